// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTPS log drain.
//!
//! Accepts batches of log lines pushed over HTTP, frames and parses every line into a
//! [`entry::LogEntry`] and appends it to the [`sink::Sink`] registered for the destination
//! named by the request path. On shutdown every open sink is flushed and closed through the
//! [`drain`] controller.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod ansi;
pub mod config;
pub mod drain;
pub mod entry;
pub mod error;
pub mod framer;
pub mod handler;
pub mod http_utils;
pub mod registry;
pub mod server;
pub mod sink;
