// SPDX-License-Identifier: Apache-2.0

pub mod acquisition;
pub mod bounded_channel;
