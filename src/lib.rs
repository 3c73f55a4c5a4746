// SPDX-License-Identifier: Apache-2.0

pub mod collector;
pub mod crypto;
pub mod init;
pub mod pump;
pub mod spool;
pub mod stats;
pub mod telemetry;
