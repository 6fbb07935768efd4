//! The std-backed host: wall clock, file loader and logged output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use scriptvm_core::Host;
use tracing::{debug, info};

use crate::config::HostConfig;

/// Lines a host has printed, shared with whoever wants to read them back.
pub type Transcript = Arc<RwLock<Vec<String>>>;

pub struct StdHost {
    started: Instant,
    ticks_per_second: u32,
    extension: String,
    script_dirs: Vec<PathBuf>,
    transcript: Transcript,
    echo: bool,
}

impl StdHost {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            started: Instant::now(),
            ticks_per_second: config.ticks_per_second.max(1),
            extension: config.extension.trim_start_matches('.').to_string(),
            script_dirs: config.script_dirs.clone(),
            transcript: Arc::new(RwLock::new(Vec::new())),
            echo: false,
        }
    }

    /// Also write every output line to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn transcript(&self) -> Transcript {
        Arc::clone(&self.transcript)
    }

    pub fn script_dirs(&self) -> &[PathBuf] {
        &self.script_dirs
    }

    fn candidates(&self, path: &str) -> Vec<PathBuf> {
        let given = Path::new(path);
        let mut candidates: Vec<PathBuf> = if given.is_absolute() {
            Vec::new()
        } else {
            self.script_dirs.iter().map(|dir| dir.join(given)).collect()
        };
        candidates.push(given.to_path_buf());
        candidates
    }
}

impl Host for StdHost {
    fn timer(&self) -> u32 {
        let elapsed = self.started.elapsed();
        let ticks = elapsed.as_millis() * u128::from(self.ticks_per_second) / 1000;
        ticks as u32
    }

    fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    fn mangle_path(&self, name: &str) -> String {
        let lowered = name.to_ascii_lowercase();
        if self.extension.is_empty() || Path::new(&lowered).extension().is_some() {
            lowered
        } else {
            format!("{lowered}.{}", self.extension)
        }
    }

    fn output(&mut self, text: &str) {
        info!(target: "scriptvm::output", "{text}");
        if self.echo {
            println!("{text}");
        }
        self.transcript.write().push(text.to_string());
    }

    fn load(&mut self, path: &str) -> io::Result<Vec<u8>> {
        for candidate in self.candidates(path) {
            match fs::read(&candidate) {
                Ok(bytes) => {
                    debug!(path = %candidate.display(), len = bytes.len(), "script loaded");
                    return Ok(bytes);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{path} not found in {} search directories", self.script_dirs.len()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_lowercased_and_get_the_extension() {
        let host = StdHost::new(&HostConfig::default());
        assert_eq!(host.mangle_path("Door"), "door.int");
        assert_eq!(host.mangle_path("maps/Door.bin"), "maps/door.bin");
    }

    #[test]
    fn output_lands_in_the_transcript() {
        let mut host = StdHost::new(&HostConfig::default());
        let transcript = host.transcript();
        host.output("hello");
        assert_eq!(*transcript.read(), vec!["hello".to_string()]);
    }
}
