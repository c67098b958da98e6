use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

static CALL_ID_SEED: OnceLock<u64> = OnceLock::new();
static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

/// splitmix64 finalizer; a bijection on `u64`.
#[inline]
pub(crate) fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Id for a tool call the backend streamed without one.
///
/// Seeded once per process so ids do not repeat across restarts.
#[inline]
pub(crate) fn next_call_id() -> String {
    let seed = *CALL_ID_SEED.get_or_init(|| fastrand::u64(..));
    let seq = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    call_id(seed, seq)
}

#[inline]
fn call_id(seed: u64, seq: u64) -> String {
    format_id_hex("call_", mix_u64(seed ^ seq))
}

#[inline]
pub(crate) fn format_id_hex(prefix: &str, value: u64) -> String {
    let mut out = String::with_capacity(prefix.len() + 16);
    out.push_str(prefix);
    push_u64_hex_16(&mut out, value);
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}
