// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Universal Domain Locators: the client-facing server address strings.

pub mod parser;

pub use parser::{parse_udl, parse_udl_list, CloudPolicy, FailoverPolicy, ParsedUdl, Regime};
