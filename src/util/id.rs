use std::time::{Duration, SystemTime};

/// Short, lowercase base36 id used to name per-run worktrees.
///
/// Mixes wall-clock nanos and pid with OS randomness so concurrent runs in the
/// same second (or with a frozen clock in CI) still get distinct names.
pub fn create_session_id() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let pid = std::process::id() as u128;
    let mut rnd = [0u8; 8];
    let noise = match getrandom::getrandom(&mut rnd) {
        Ok(()) => u64::from_le_bytes(rnd) as u128,
        Err(_) => 0,
    };
    let mix = now.as_nanos() ^ (pid << 40) ^ noise;
    // base36 encode the low 52 bits for brevity
    let mut v = (mix & 0xf_ffff_ffff_ffff) as u64;
    let alphabet = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut s = String::new();
    if v == 0 {
        s.push('0');
    } else {
        while v > 0 {
            s.push(alphabet[(v % 36) as usize] as char);
            v /= 36;
        }
    }
    s.chars().rev().collect()
}
