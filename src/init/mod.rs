// SPDX-License-Identifier: Apache-2.0

pub mod args;
pub mod logging;
pub mod parse;
pub mod sender;
pub mod wait;
