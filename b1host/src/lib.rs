//! Host wiring for the interpreter: stdio `IoPort`, an OS-seeded
//! `RandomSource`, and the default ASCII locale (spec §6, "I/O" /
//! "Locale / randomness"). Analogous to the teacher's `vcpu-interop`
//! wiring a `Processor` to host I/O, minus the FFI surface — this
//! crate is consumed from Rust, not a C host.

use std::io::{self, Read, Write};

use b1core::{AsciiLocale, Error, ErrorKind, LocaleCompare, RandomSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `IoPort` over the process's own stdin/stdout.
pub struct StdioPort {
    stdin: io::Stdin,
    stdout: io::Stdout,
    pending: Option<u8>,
}

impl StdioPort {
    pub fn new() -> Self {
        StdioPort {
            stdin: io::stdin(),
            stdout: io::stdout(),
            pending: None,
        }
    }
}

impl Default for StdioPort {
    fn default() -> Self {
        StdioPort::new()
    }
}

impl b1core::IoPort for StdioPort {
    fn put_char(&mut self, c: u8) -> Result<(), Error> {
        self.stdout.write_all(&[c]).map_err(|_| ErrorKind::EnvFatal)?;
        Ok(())
    }

    fn put_newline(&mut self) -> Result<(), Error> {
        self.stdout.write_all(b"\n").map_err(|_| ErrorKind::EnvFatal)?;
        Ok(())
    }

    fn put_margin_newline(&mut self) -> Result<(), Error> {
        self.put_newline()
    }

    fn get_char(&mut self) -> Result<Option<u8>, Error> {
        if let Some(c) = self.pending.take() {
            return Ok(Some(c));
        }
        let mut buf = [0u8; 1];
        match self.stdin.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(_) => Err(ErrorKind::EnvFatal.into()),
        }
    }
}

/// `RND`/`RANDOMIZE` backed by the OS entropy source, reseedable on demand.
pub struct OsRandomSource {
    rng: StdRng,
}

impl OsRandomSource {
    pub fn new() -> Self {
        OsRandomSource {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for OsRandomSource {
    fn default() -> Self {
        OsRandomSource::new()
    }
}

impl RandomSource for OsRandomSource {
    fn randomize(&mut self, seed: Option<i32>) {
        self.rng = match seed {
            Some(s) => StdRng::seed_from_u64(s as u64),
            None => StdRng::from_entropy(),
        };
    }

    fn next_seed(&mut self, max: i32) -> i32 {
        if max <= 0 {
            return 0;
        }
        self.rng.gen_range(0..=max)
    }
}

/// The default locale wiring: ASCII case folding, no platform `locale_t`.
/// A host embedding this crate on a platform with real locale support can
/// substitute its own `LocaleCompare` impl instead.
pub fn default_locale() -> AsciiLocale {
    AsciiLocale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_random_source_respects_max() {
        let mut rng = OsRandomSource::new();
        for _ in 0..50 {
            let v = rng.next_seed(10);
            assert!((0..=10).contains(&v));
        }
    }

    #[test]
    fn os_random_source_zero_max_is_zero() {
        let mut rng = OsRandomSource::new();
        assert_eq!(rng.next_seed(0), 0);
    }

    #[test]
    fn seeded_randomize_is_deterministic() {
        let mut a = OsRandomSource::new();
        let mut b = OsRandomSource::new();
        a.randomize(Some(42));
        b.randomize(Some(42));
        assert_eq!(a.next_seed(1_000_000), b.next_seed(1_000_000));
    }

    #[test]
    fn default_locale_folds_ascii_case() {
        use b1core::LocaleCompare;
        let locale = default_locale();
        assert_eq!(locale.to_upper(b'q'), b'Q');
    }
}
