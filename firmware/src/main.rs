#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
// Host builds only compile the portable modules for their unit tests.
#![cfg_attr(not(target_os = "none"), allow(dead_code))]

mod clock;
mod serial;

#[cfg(target_os = "none")]
mod panic;
#[cfg(target_os = "none")]
mod runtime;

#[cfg(not(target_os = "none"))]
fn main() {}
