//! A hot-reloadable counter module
//!
//! Build it, point the host at the output directory, and rebuild while the
//! host runs:
//!
//! ```text
//! cargo build -p hotswap-demo
//! hotswap run --source-dir target/debug counter
//! ```
//!
//! Every reload hands the current count to the next version, which bumps it,
//! so the count equals the number of reloads survived.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use hotswap_kernel::{HostContext, StateChannel};

static RELOADS: AtomicU64 = AtomicU64::new(0);

/// Reloads survived by this instance of the module
pub fn reloads() -> u64 {
    RELOADS.load(Ordering::SeqCst)
}

fn on_load(_context: HostContext, state: Option<&mut StateChannel>) {
    let restored = state
        .and_then(|channel| {
            let mut raw = [0u8; 8];
            channel.read_exact(&mut raw).ok().map(|_| u64::from_le_bytes(raw) + 1)
        })
        .unwrap_or(0);
    RELOADS.store(restored, Ordering::SeqCst);
}

fn on_unload(_context: HostContext, state: Option<&mut StateChannel>) {
    if let Some(channel) = state {
        // a short write leaves the next version starting from zero
        let _ = channel.write_all(&reloads().to_le_bytes());
    }
}

hotswap_kernel::declare_module!(counter, on_load, on_unload);
