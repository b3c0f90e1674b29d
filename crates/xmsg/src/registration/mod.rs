// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Actor registration: records, database, registrar service and driver.

pub mod database;
pub mod driver;
pub mod protocol;
pub mod record;
pub mod service;

pub use database::{RegistrationDatabase, RegistrationFilter};
pub use driver::RegistrarDriver;
pub use protocol::{Query, RequestKind};
pub use record::{OwnerType, Registration};
pub use service::{Registrar, Registry};
