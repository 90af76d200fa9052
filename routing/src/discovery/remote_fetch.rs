use super::{RemoteStrategy, StrategyError, StrategyResult};
use crate::codec::{PrefixCodec, PrefixFile};
use crate::storage::{RemoteError, Repository};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Uses the prefix file the remote publishes, if any.
pub struct RemotePrefixFileStrategy {
    codec: PrefixCodec,
    path: String,
}

impl RemotePrefixFileStrategy {
    pub const ID: &'static str = "prefix-file";

    pub fn new(codec: PrefixCodec, path: impl Into<String>) -> Self {
        RemotePrefixFileStrategy {
            codec,
            path: path.into(),
        }
    }
}

fn age_message(age_millis: i64) -> String {
    let days = age_millis / DAY_MILLIS;
    match days {
        d if d < 1 => "Remote publishes prefix file (is less than a day old), using it.".into(),
        1 => "Remote publishes prefix file (is 1 day old), using it.".into(),
        d => format!("Remote publishes prefix file (is {d} days old), using it."),
    }
}

#[async_trait]
impl RemoteStrategy for RemotePrefixFileStrategy {
    fn id(&self) -> &'static str {
        Self::ID
    }

    async fn discover(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<StrategyResult, StrategyError> {
        let remote = repository
            .remote()
            .ok_or_else(|| StrategyError::Failed("Repository has no remote storage.".into()))?;

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StrategyError::Cancelled),
            fetched = remote.fetch(&self.path) => fetched,
        };
        let file = match fetched {
            Ok(file) => file,
            Err(RemoteError::NotFound(_)) => {
                return Err(StrategyError::Failed(
                    "Remote does not publish prefix file.".into(),
                ));
            }
            Err(e) => {
                return Err(StrategyError::from_remote(
                    "Could not fetch remote prefix file",
                    e,
                ));
            }
        };

        match self.codec.read(&file.body) {
            Ok(PrefixFile::Supported(entries)) => {
                // unknown means just fetched
                let age = file
                    .last_modified
                    .map(|modified| crate::now_millis() - modified)
                    .unwrap_or(0);
                Ok(StrategyResult {
                    message: age_message(age),
                    entries,
                })
            }
            Ok(PrefixFile::Unsupported) => Err(StrategyError::Failed(
                "Remote disabled automatic routing by publishing noscrape marker.".into(),
            )),
            Err(e) => Err(StrategyError::Failed(format!(
                "Remote strategy {} detected invalid input, results discarded: {e}",
                Self::ID
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MAGIC;
    use crate::config::Config;
    use crate::prefix::PrefixSet;
    use crate::testutils::proxy;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::time::Duration;

    const PATH: &str = "/.meta/prefixes.txt";

    fn strategy(config: &Config) -> RemotePrefixFileStrategy {
        RemotePrefixFileStrategy::new(PrefixCodec::new(config), PATH)
    }

    fn prefix_file() -> String {
        format!("{MAGIC}\n# This is mighty prefix file!\n/org/apache/maven\n/org/sonatype\n # Added later\n/eu/flatwhite\n")
    }

    #[tokio::test]
    async fn test_discover_plaintext() {
        let (repository, _, remote) = proxy("central");
        remote.serve_file(PATH, prefix_file(), Some(crate::now_millis() - 1000));

        let result = strategy(&Config::default())
            .discover(&repository, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.message,
            "Remote publishes prefix file (is less than a day old), using it."
        );
        assert_eq!(
            result.entries,
            PrefixSet::from_entries(["/org/apache/maven", "/org/sonatype", "/eu/flatwhite"])
        );
    }

    #[tokio::test]
    async fn test_discover_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(prefix_file().as_bytes()).unwrap();
        let (repository, _, remote) = proxy("central");
        remote.serve_file(PATH, encoder.finish().unwrap(), None);

        let result = strategy(&Config::default())
            .discover(&repository, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_old_file_message() {
        let (repository, _, remote) = proxy("central");
        remote.serve_file(PATH, prefix_file(), Some(crate::now_millis() - 3 * DAY_MILLIS - 5));
        let result = strategy(&Config::default())
            .discover(&repository, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.message,
            "Remote publishes prefix file (is 3 days old), using it."
        );
    }

    #[tokio::test]
    async fn test_failures() {
        let (repository, _, remote) = proxy("central");
        let subject = strategy(&Config {
            prefix_file_max_line_length: 10,
            ..Config::default()
        });
        let cancel = CancellationToken::new();

        assert_eq!(
            subject.discover(&repository, &cancel).await,
            Err(StrategyError::Failed("Remote does not publish prefix file.".into()))
        );

        remote.serve_file(PATH, prefix_file(), None);
        let Err(StrategyError::Failed(message)) = subject.discover(&repository, &cancel).await
        else {
            panic!("expected failure");
        };
        assert!(message.contains("strategy prefix-file"));
        assert!(message.contains("exceeds"));

        remote.fail_file(PATH, RemoteError::Status(500));
        let Err(StrategyError::Failed(message)) = subject.discover(&repository, &cancel).await
        else {
            panic!("expected failure");
        };
        assert!(message.contains("Unexpected response code 500"));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_fetch() {
        let (repository, _, remote) = proxy("central");
        remote.serve_file(PATH, prefix_file(), None);
        remote.set_delay(Duration::from_secs(30));

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let result = strategy(&Config::default())
            .discover(&repository, &cancel)
            .await;
        assert_eq!(result, Err(StrategyError::Cancelled));
    }
}
