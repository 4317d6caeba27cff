// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exposes the target's M-profile architecture version as a `cfg`, the way
//! the structural teacher's `build-util::expose_m_profile` does for its own
//! task crates. This crate only ever targets ARMv7-M (the spec fixes the
//! architecture, unlike the teacher's multi-board support), so the only
//! values this produces are `armv7m` or nothing at all.
//!
//! Unlike the teacher's build script, this one does not panic when built
//! for the host: `hl`'s non-`svc`-issuing logic (`pack_name`, `decode`) is
//! exercised by `cargo test` on the host per §10.4, and a hard panic here
//! would make that impossible.

use std::env;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(armv7m)");
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumbv7m") || target.starts_with("thumbv7em") {
        println!("cargo:rustc-cfg=armv7m");
    }
}
