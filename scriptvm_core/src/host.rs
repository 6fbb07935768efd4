//! Services the VM needs from its embedding application.

use std::collections::HashMap;
use std::io;

/// Timer, path mangling, output and loading supplied by the embedding application.
pub trait Host {
    /// Current time in host ticks.
    fn timer(&self) -> u32;

    fn ticks_per_second(&self) -> u32 {
        1000
    }

    /// Applied to every script-referenced name before it is loaded.
    fn mangle_path(&self, name: &str) -> String;

    /// Sink for script print statements and runtime notices.
    fn output(&mut self, text: &str);

    fn load(&mut self, path: &str) -> io::Result<Vec<u8>>;

    /// Timer reading scaled to milliseconds, the unit used by waits and timed procedures.
    fn now_ms(&self) -> u32 {
        let ticks = u64::from(self.ticks_per_second().max(1));
        (u64::from(self.timer()) * 1000 / ticks) as u32
    }
}

/// A host with a manually driven clock and in-memory scripts.
///
/// Useful for embedding the VM in tools and for deterministic tests.
#[derive(Debug, Default)]
pub struct MemoryHost {
    time: u32,
    ticks_per_second: u32,
    scripts: HashMap<String, Vec<u8>>,
    output: Vec<String>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            ticks_per_second: 1000,
            ..Self::default()
        }
    }

    pub fn with_ticks_per_second(mut self, ticks: u32) -> Self {
        self.ticks_per_second = ticks.max(1);
        self
    }

    pub fn add_script(&mut self, name: &str, bytes: Vec<u8>) {
        let key = self.mangle_path(name);
        self.scripts.insert(key, bytes);
    }

    pub fn set_time(&mut self, ticks: u32) {
        self.time = ticks;
    }

    pub fn advance(&mut self, ticks: u32) {
        self.time = self.time.wrapping_add(ticks);
    }

    pub fn output_lines(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }
}

impl Host for MemoryHost {
    fn timer(&self) -> u32 {
        self.time
    }

    fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second.max(1)
    }

    fn mangle_path(&self, name: &str) -> String {
        name.to_ascii_lowercase()
    }

    fn output(&mut self, text: &str) {
        self.output.push(text.to_string());
    }

    fn load(&mut self, path: &str) -> io::Result<Vec<u8>> {
        self.scripts.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no script named {path}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_scales_to_milliseconds() {
        let mut host = MemoryHost::new().with_ticks_per_second(18);
        host.set_time(36);
        assert_eq!(host.now_ms(), 2000);
    }

    #[test]
    fn scripts_load_by_mangled_name() {
        let mut host = MemoryHost::new();
        host.add_script("Door", vec![1, 2, 3]);
        let path = host.mangle_path("DOOR");
        assert_eq!(host.load(&path).expect("loads"), vec![1, 2, 3]);
        assert!(host.load("window").is_err());
    }
}
