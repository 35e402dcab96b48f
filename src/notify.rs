use async_trait::async_trait;
use tracing::info;

use crate::auth::claims::AuthDomain;

/// Out-of-band delivery of reset links (email, SMS).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_password_reset(
        &self,
        email: &str,
        name: &str,
        domain: AuthDomain,
        reset_url: &str,
    ) -> anyhow::Result<()>;
}

/// Records delivery requests in the log. The URL carries the secret, so it
/// is not logged.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_password_reset(
        &self,
        email: &str,
        name: &str,
        domain: AuthDomain,
        _reset_url: &str,
    ) -> anyhow::Result<()> {
        info!(%email, %name, %domain, "password reset delivery requested");
        Ok(())
    }
}

pub fn reset_url(base: &str, domain: AuthDomain, raw_token: &str) -> String {
    let base = base.trim_end_matches('/');
    match domain {
        AuthDomain::Standard => format!("{base}/reset-password/{raw_token}"),
        AuthDomain::Elevated => format!("{base}/admin/reset-password/{raw_token}"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures sent links so tests can pull the raw token back out.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, AuthDomain, String)>>,
    }

    impl RecordingNotifier {
        pub fn last_token(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap();
            sent.last()
                .and_then(|(_, _, url)| url.rsplit('/').next().map(str::to_owned))
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_password_reset(
            &self,
            email: &str,
            _name: &str,
            domain: AuthDomain,
            reset_url: &str,
        ) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_owned(), domain, reset_url.to_owned()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_domain_specific_urls() {
        assert_eq!(
            reset_url("https://church.example/", AuthDomain::Standard, "abc"),
            "https://church.example/reset-password/abc"
        );
        assert_eq!(
            reset_url("https://church.example", AuthDomain::Elevated, "abc"),
            "https://church.example/admin/reset-password/abc"
        );
    }
}
