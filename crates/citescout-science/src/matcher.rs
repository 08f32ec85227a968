use std::path::PathBuf;

use async_trait::async_trait;
use citescout_core::config::MatcherConfig;
use citescout_core::{AppConfig, MatchScore};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Result, ScienceError};
use crate::exchange::{ExchangeData, ExchangeWriter, MatchResultReader};

/// Scores candidate titles against fetched records.
#[async_trait]
pub trait Correlator: Send + Sync {
    async fn correlate(&self, exchange: &ExchangeData) -> Result<Vec<MatchScore>>;
}

/// Runs an out-of-process matcher as
/// `<program> [args…] <exchange file> <output file>`.
pub struct ExternalMatcher {
    program: Option<PathBuf>,
    args: Vec<String>,
    exchange_path: PathBuf,
    output_path: PathBuf,
}

impl ExternalMatcher {
    pub fn new(
        program: Option<PathBuf>,
        args: Vec<String>,
        exchange_path: PathBuf,
        output_path: PathBuf,
    ) -> Self {
        Self {
            program,
            args,
            exchange_path,
            output_path,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let MatcherConfig { program, args, .. } = &cfg.matcher;
        Self::new(
            program.as_ref().map(PathBuf::from),
            args.clone(),
            cfg.exchange_path(),
            cfg.matcher_output_path(),
        )
    }

    async fn invoke(&self, program: &PathBuf) -> Result<()> {
        let status = Command::new(program)
            .args(&self.args)
            .arg(&self.exchange_path)
            .arg(&self.output_path)
            .status()
            .await;

        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => {
                warn!(program = %program.display(), status = %s, "matcher exited unsuccessfully");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(program = %program.display(), "matcher program not found");
                Ok(())
            }
            Err(e) => Err(ScienceError::Matcher(format!(
                "failed to start {}: {e}",
                program.display()
            ))),
        }
    }
}

#[async_trait]
impl Correlator for ExternalMatcher {
    async fn correlate(&self, exchange: &ExchangeData) -> Result<Vec<MatchScore>> {
        ExchangeWriter::write(&self.exchange_path, exchange)?;

        // Never read a previous run's scores.
        match tokio::fs::remove_file(&self.output_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let Some(program) = &self.program else {
            info!("no matcher configured, treating as no matches");
            return Ok(Vec::new());
        };
        self.invoke(program).await?;

        let scores = MatchResultReader::read(&self.output_path)?;
        info!(rows = scores.len(), "read matcher output");
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn matcher(dir: &TempDir, program: Option<&str>, args: &[&str]) -> ExternalMatcher {
        ExternalMatcher::new(
            program.map(PathBuf::from),
            args.iter().map(|a| a.to_string()).collect(),
            dir.path().join("exchange.json"),
            dir.path().join("matches.json"),
        )
    }

    #[tokio::test]
    async fn without_program_writes_exchange_and_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let m = matcher(&dir, None, &[]);
        let scores = m.correlate(&ExchangeData::default()).await.unwrap();
        assert!(scores.is_empty());
        assert!(dir.path().join("exchange.json").exists());
    }

    #[tokio::test]
    async fn stale_output_is_discarded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("matches.json"),
            r#"{"matches": [{"structure_id": "D1", "pmid": "1", "score": 1.0}]}"#,
        )
        .unwrap();
        let m = matcher(&dir, None, &[]);
        assert!(m.correlate(&ExchangeData::default()).await.unwrap().is_empty());
        assert!(!dir.path().join("matches.json").exists());
    }

    #[tokio::test]
    async fn missing_program_is_no_matches() {
        let dir = TempDir::new().unwrap();
        let m = matcher(&dir, Some("/nonexistent/citescout-matcher"), &[]);
        assert!(m.correlate(&ExchangeData::default()).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn program_output_is_read() {
        let dir = TempDir::new().unwrap();
        let script = r#"printf '{"matches":[{"structure_id":"D1","pmid":"111","score":0.95}]}' > "$2""#;
        let m = matcher(&dir, Some("/bin/sh"), &["-c", script, "matcher"]);
        let scores = m.correlate(&ExchangeData::default()).await.unwrap();
        assert_eq!(scores, vec![MatchScore::new("D1", "111", 0.95)]);
    }
}
