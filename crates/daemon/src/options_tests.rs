// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;
use std::path::Path;

#[test]
fn defaults_are_off() {
    let options = DaemonOptions::try_parse_from(["app"]).unwrap();
    assert!(!options.detach);
    assert!(!options.recover);
    assert!(!options.debug_workers);
    assert_eq!(options.pid_file, None);
    assert_eq!(options.runtime_dir, None);
}

#[test]
fn short_and_long_flags_parse() {
    let options = DaemonOptions::try_parse_from([
        "app",
        "-d",
        "-p",
        "/run/app.pid",
        "--recover",
        "--runtime-dir",
        "/var/lib/app",
        "--debug-workers",
    ])
    .unwrap();

    assert!(options.detach);
    assert!(options.recover);
    assert!(options.debug_workers);
    assert_eq!(options.pid_file.as_deref(), Some(Path::new("/run/app.pid")));
    assert_eq!(
        options.runtime_dir.as_deref(),
        Some(Path::new("/var/lib/app"))
    );
}

#[test]
fn unknown_flag_is_an_error() {
    assert!(DaemonOptions::try_parse_from(["app", "--no-such-flag"]).is_err());
}
