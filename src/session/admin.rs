use super::Session;
use crate::error::Result;
use crate::transport::Transport;

/// Index-level housekeeping over the spans of one identity.
pub struct IndexAdmin<'a, T> {
    session: &'a Session<T>,
}

impl<'a, T: Transport> IndexAdmin<'a, T> {
    pub(super) fn new(session: &'a Session<T>) -> Self {
        IndexAdmin { session }
    }

    /// Names of the existing span indexes, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let pattern = self.session.identity().pattern();
        match self.session.transport().list_indexes(&pattern).await {
            Ok(mut names) => {
                names.sort();
                Ok(names)
            }
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        let pattern = self.session.identity().pattern();
        self.session.transport().index_exists(&pattern).await
    }

    /// Deletes the named indexes one by one.
    ///
    /// An index that is already gone only warns; the result is `false` when
    /// any deletion failed or was not acknowledged.
    pub async fn delete<S: AsRef<str>>(&self, names: &[S]) -> Result<bool> {
        let mut ok = true;
        for name in names {
            let name = name.as_ref();
            match self.session.transport().delete_index(name).await {
                Ok(true) => {
                    tracing::info!(parent: self.session.span(), index = name, "deleted index");
                }
                Ok(false) => {
                    tracing::error!(parent: self.session.span(), index = name, "index deletion not acknowledged");
                    ok = false;
                }
                Err(err) if err.is_not_found() => {
                    tracing::warn!(parent: self.session.span(), index = name, "index not found");
                }
                Err(err) => {
                    tracing::error!(parent: self.session.span(), index = name, "index deletion failed: {err}");
                    ok = false;
                }
            }
        }
        Ok(ok)
    }

    /// Deletes every span index of the identity.
    pub async fn delete_all(&self) -> Result<bool> {
        let names = self.list().await?;
        self.delete(&names).await
    }

    /// Sets `refresh_interval` on every span; `-1` disables refreshing.
    pub async fn set_refresh(&self, period: &str) -> bool {
        let pattern = self.session.identity().pattern();
        match self.session.transport().set_index_setting(&pattern, period).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(parent: self.session.span(), index = %pattern, period, "refresh interval not set: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::session::testing::session;
    use crate::transport::memory::MemoryTransport;

    fn with_indexes(names: &[&str]) -> MemoryTransport {
        let transport = MemoryTransport::new();
        transport.state().indexes = names.iter().map(|name| name.to_string()).collect();
        transport
    }

    #[tokio::test]
    async fn list_matches_pattern_and_tolerates_none() {
        let populated = session(with_indexes(&["ta-cst-src-2023-04", "ta-cst-src-2023-03", "ta-other-src-all"]));
        let admin = populated.admin();
        assert_eq!(admin.list().await.unwrap(), vec!["ta-cst-src-2023-03", "ta-cst-src-2023-04"]);
        assert!(admin.exists().await.unwrap());

        let empty = session(MemoryTransport::new());
        assert!(empty.admin().list().await.unwrap().is_empty());
        assert!(!empty.admin().exists().await.unwrap());
    }

    #[tokio::test]
    async fn delete_warns_on_missing_and_fails_on_unacknowledged() {
        let transport = with_indexes(&["ta-cst-src-2023-03", "ta-cst-src-2023-04"]);
        let session = session(transport);
        let admin = session.admin();

        assert!(admin.delete(&["ta-cst-src-2023-03", "ta-cst-src-1999-01"]).await.unwrap());
        assert_eq!(session.transport().state().deleted_indexes, vec!["ta-cst-src-2023-03"]);

        session.transport().state().unacknowledged = vec!["ta-cst-src-2023-04".to_string()];
        assert!(!admin.delete_all().await.unwrap());
    }

    #[tokio::test]
    async fn set_refresh_reports_failure() {
        let session = session(MemoryTransport::new());
        assert!(session.admin().set_refresh("-1").await);
        assert_eq!(
            session.transport().state().settings,
            vec![("ta-cst-src-*".to_string(), "-1".to_string())]
        );

        session.transport().state().fail_settings = true;
        assert!(!session.admin().set_refresh("1s").await);
    }
}
