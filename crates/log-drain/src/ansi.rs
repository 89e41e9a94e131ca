// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Removal of ANSI terminal escape sequences (colors, cursor movement) from log messages.

use regex::{NoExpand, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\x1b[^m]*m").expect("invalid ANSI escape pattern"));

/// Strips every `ESC ... m` sequence from `message`, leaving the surrounding text untouched.
///
/// Borrows when there is nothing to remove.
pub fn strip_ansi(message: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(message, NoExpand(""))
}
