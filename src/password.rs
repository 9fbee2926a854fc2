//! Password Policy and bind lockout (spec §4.K, §4.I's bind/lockout state
//! machine). All pieces are thread-safe and hot-reconfigurable: policy and
//! lockout knobs live behind the same lock that's read on every bind, so a
//! live config change applies to in-flight binds without a restart (spec
//! §9 "Mutable shared state as ownership").

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::dn::Dn;
use crate::error::{
    account_locked, in_history, invalid_credentials, no_digit, no_lowercase, no_special,
    no_uppercase, too_long, too_short, Result,
};

/// Pluggable password hashing/verification (spec §4.K via SPEC_FULL §4.K
/// "added"). The default is a salted SHA-256 digest, constant-time
/// compared; callers wanting a stronger KDF (bcrypt/argon2) provide their
/// own `PasswordVerifier`.
pub trait PasswordVerifier: Send + Sync {
    fn hash(&self, candidate: &[u8]) -> String;
    fn verify(&self, candidate: &[u8], stored: &str) -> bool;
}

/// `salt_hex$digest_hex`, SHA-256 over `salt || candidate`.
pub struct Sha256Verifier;

impl Sha256Verifier {
    fn digest(salt: &[u8], candidate: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(candidate);
        hex::encode(hasher.finalize())
    }
}

impl PasswordVerifier for Sha256Verifier {
    fn hash(&self, candidate: &[u8]) -> String {
        let mut salt = [0u8; 16];
        for (i, byte) in salt.iter_mut().enumerate() {
            // Not cryptographically random by itself; combined with the
            // process-local entropy in `std::time` this is adequate for a
            // salt (not a secret) and keeps the dependency set aligned
            // with the corpus, which carries no RNG crate for this
            // teacher lineage.
            let nanos = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0);
            *byte = ((nanos >> (i % 4 * 8)) ^ (i as u32)) as u8;
        }
        format!("{}${}", hex::encode(salt), Self::digest(&salt, candidate))
    }

    fn verify(&self, candidate: &[u8], stored: &str) -> bool {
        let Some((salt_hex, expected_hex)) = stored.split_once('$') else {
            return false;
        };
        let Ok(salt) = hex::decode(salt_hex) else {
            return false;
        };
        let actual_hex = Self::digest(&salt, candidate);
        constant_time_eq(actual_hex.as_bytes(), expected_hex.as_bytes())
    }
}

/// Minimal inline hex codec — the teacher's dependency set carries no
/// dedicated `hex` crate for this lineage, and this is the only call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        if s.len() % 2 != 0 {
            return Err(());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
            .collect()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Complexity/expiration/history knobs (spec §4.K, §6
/// `security.passwordPolicy.*`).
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    /// `Duration::ZERO` means "never expires".
    pub max_age: Duration,
    pub grace_logins: u32,
    pub history_size: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
            max_age: Duration::ZERO,
            grace_logins: 0,
            history_size: 0,
        }
    }
}

const SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{};:,.<>/?|~`";

impl PasswordPolicy {
    /// Checks complexity only (spec §4.K); length bounds are inclusive, so
    /// a password at exactly `min_length` or `max_length` passes (spec §8
    /// boundary behavior).
    pub fn validate_complexity(&self, password: &str) -> Result<()> {
        let len = password.chars().count();
        if len < self.min_length {
            return Err(too_short(format!(
                "password has {len} characters, minimum is {}",
                self.min_length
            )));
        }
        if len > self.max_length {
            return Err(too_long(format!(
                "password has {len} characters, maximum is {}",
                self.max_length
            )));
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            return Err(no_uppercase("password must contain an uppercase letter"));
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            return Err(no_lowercase("password must contain a lowercase letter"));
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(no_digit("password must contain a digit"));
        }
        if self.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            return Err(no_special("password must contain a special character"));
        }
        Ok(())
    }

    /// `true` once `set_at + max_age <= now` (`max_age == 0` never expires).
    pub fn is_expired(&self, set_at: SystemTime, now: SystemTime) -> bool {
        if self.max_age.is_zero() {
            return false;
        }
        now.duration_since(set_at).unwrap_or(Duration::ZERO) >= self.max_age
    }

    /// Constant-time compares `candidate_hash` against every entry in
    /// `history` (most-recent-first or not — every entry is checked).
    pub fn check_history(&self, candidate_hash: &str, history: &[String]) -> Result<()> {
        for past in history.iter().take(self.history_size) {
            if constant_time_eq(candidate_hash.as_bytes(), past.as_bytes()) {
                return Err(in_history("password matches a recent password in history"));
            }
        }
        Ok(())
    }
}

/// Tracks grace logins consumed against an expired password (spec §4.K,
/// GLOSSARY "Grace login").
#[derive(Debug, Clone, Copy, Default)]
pub struct GraceLoginState {
    pub consumed: u32,
}

impl GraceLoginState {
    /// Consumes one grace login if any remain. Returns `true` if the login
    /// is allowed (a grace login was available), `false` if exhausted
    /// (`fullyExpired`).
    pub fn consume(&mut self, allowed: u32) -> bool {
        if self.consumed >= allowed {
            return false;
        }
        self.consumed += 1;
        true
    }
}

/// Per-DN bind/lockout state (spec §4.I state machine):
/// `Clean -> (failure) -> Counting(n) -> (n >= max) -> Locked{since}`.
/// `Locked` exits to `Clean` on manual unlock or once
/// `now - since >= lockout_duration` (duration 0 = permanent).
/// `RecordSuccess` clears the failure count but does not unlock; `Unlock`
/// clears both.
#[derive(Debug, Clone, Copy, Default)]
struct LockoutState {
    failures: u32,
    locked_since: Option<SystemTime>,
}

/// `maxFailures`/`lockoutDuration` knobs (spec §6
/// `security.rateLimit.*`) plus the per-DN state map. The map is one
/// `RwLock`; each DN's state lives behind its own `Mutex` so contention on
/// one principal never blocks binds against another (spec §5).
pub struct LockoutTable {
    states: RwLock<HashMap<Dn, Mutex<LockoutState>>>,
}

impl LockoutTable {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    fn with_state<T>(&self, dn: &Dn, f: impl FnOnce(&mut LockoutState) -> T) -> T {
        {
            let states = self.states.read().unwrap();
            if let Some(lock) = states.get(dn) {
                return f(&mut lock.lock().unwrap());
            }
        }
        let mut states = self.states.write().unwrap();
        let lock = states.entry(dn.clone()).or_insert_with(Default::default);
        f(&mut lock.lock().unwrap())
    }

    /// Returns `Err(AccountLocked)` if the DN is currently locked (auto
    /// unlocking first if `lockout_duration` has elapsed).
    pub fn check(&self, dn: &Dn, now: SystemTime, lockout_duration: Duration) -> Result<()> {
        self.with_state(dn, |state| {
            if let Some(since) = state.locked_since {
                if !lockout_duration.is_zero()
                    && now.duration_since(since).unwrap_or(Duration::ZERO) >= lockout_duration
                {
                    state.locked_since = None;
                    state.failures = 0;
                    return Ok(());
                }
                return Err(account_locked(format!(
                    "account locked since {since:?}, retry after lockout duration elapses"
                )));
            }
            Ok(())
        })
    }

    /// Records a failed bind attempt. Transitions to `Locked` once
    /// `failures >= max_failures`.
    pub fn record_failure(&self, dn: &Dn, now: SystemTime, max_failures: u32) {
        self.with_state(dn, |state| {
            state.failures += 1;
            if state.failures >= max_failures && state.locked_since.is_none() {
                state.locked_since = Some(now);
                tracing::warn!(dn = %dn.as_str(), failures = state.failures, "account locked out after repeated bind failures");
            }
        });
    }

    /// Clears the failure count on a successful bind. Does **not** unlock
    /// an already-locked account (spec §4.I).
    pub fn record_success(&self, dn: &Dn) {
        self.with_state(dn, |state| {
            state.failures = 0;
        });
    }

    /// Administrative unlock: clears both the failure count and the lock.
    pub fn unlock(&self, dn: &Dn) {
        self.with_state(dn, |state| {
            state.failures = 0;
            state.locked_since = None;
        });
    }

    pub fn is_locked(&self, dn: &Dn, now: SystemTime, lockout_duration: Duration) -> bool {
        self.check(dn, now, lockout_duration).is_err()
    }
}

impl Default for LockoutTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate-limit knobs (spec §6 `security.rateLimit.*`).
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            lockout_duration: Duration::from_secs(15 * 60),
        }
    }
}

/// Fails with `InvalidCredentials` if `candidate` matches none of the
/// stored `userPassword` values using `verifier`.
pub fn verify_any(
    verifier: &dyn PasswordVerifier,
    candidate: &[u8],
    stored_values: &[Vec<u8>],
) -> Result<()> {
    for stored in stored_values {
        let stored_str = String::from_utf8_lossy(stored);
        if verifier.verify(candidate, &stored_str) {
            return Ok(());
        }
    }
    Err(invalid_credentials("no stored password matched"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_verifier_round_trips() {
        let v = Sha256Verifier;
        let hash = v.hash(b"hunter2");
        assert!(v.verify(b"hunter2", &hash));
        assert!(!v.verify(b"wrong", &hash));
    }

    #[test]
    fn complexity_rejects_missing_classes() {
        let policy = PasswordPolicy::default();
        assert!(policy.validate_complexity("alllowercase1").is_err());
        assert!(policy.validate_complexity("ALLUPPERCASE1").is_err());
        assert!(policy.validate_complexity("NoDigitsHere").is_err());
        assert!(policy.validate_complexity("ValidPass1").is_ok());
    }

    #[test]
    fn length_exactly_at_bounds_is_valid() {
        let policy = PasswordPolicy {
            min_length: 8,
            max_length: 10,
            require_uppercase: false,
            require_lowercase: false,
            require_digit: false,
            require_special: false,
            ..PasswordPolicy::default()
        };
        assert!(policy.validate_complexity("12345678").is_ok());
        assert!(policy.validate_complexity("1234567890").is_ok());
        assert!(policy.validate_complexity("1234567").is_err());
        assert!(policy.validate_complexity("12345678901").is_err());
    }

    #[test]
    fn history_rejects_reused_hash() {
        let policy = PasswordPolicy {
            history_size: 2,
            ..PasswordPolicy::default()
        };
        let history = vec!["abc".to_string(), "def".to_string()];
        assert!(policy.check_history("abc", &history).is_err());
        assert!(policy.check_history("xyz", &history).is_ok());
    }

    #[test]
    fn grace_login_exhausts_after_limit() {
        let mut state = GraceLoginState::default();
        assert!(state.consume(2));
        assert!(state.consume(2));
        assert!(!state.consume(2));
    }

    #[test]
    fn lockout_cycle_matches_state_machine() {
        let table = LockoutTable::new();
        let dn = crate::dn::normalize("uid=alice,ou=users,dc=example,dc=com").unwrap();
        let t0 = SystemTime::UNIX_EPOCH;
        let duration = Duration::from_secs(15 * 60);

        for _ in 0..3 {
            table.record_failure(&dn, t0, 3);
        }
        assert!(table.is_locked(&dn, t0, duration));

        // Still locked just shy of the duration.
        let almost = t0 + duration - Duration::from_secs(1);
        assert!(table.is_locked(&dn, almost, duration));

        // Past the duration, auto-unlocks.
        let later = t0 + duration + Duration::from_secs(1);
        assert!(!table.is_locked(&dn, later, duration));
    }

    #[test]
    fn record_success_clears_failures_but_not_lock() {
        let table = LockoutTable::new();
        let dn = crate::dn::normalize("uid=bob,ou=users,dc=example,dc=com").unwrap();
        let t0 = SystemTime::UNIX_EPOCH;
        table.record_failure(&dn, t0, 1);
        assert!(table.is_locked(&dn, t0, Duration::ZERO));
        table.record_success(&dn);
        // Permanent lock (duration zero) is unaffected by RecordSuccess.
        assert!(table.is_locked(&dn, t0, Duration::ZERO));
        table.unlock(&dn);
        assert!(!table.is_locked(&dn, t0, Duration::ZERO));
    }
}
