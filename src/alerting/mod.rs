// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Alerting: rule engine, suppression, digest batching, delivery channels.

pub mod channels;
pub mod engine;
pub mod formatter;

pub use channels::{NotificationChannel, StreamChannel, WebhookChannel};
pub use engine::{default_rules, ActiveAlert, AlertEngine, AlertRule, MAX_MUTE_HOURS};
pub use formatter::{format_event, AlertDigest, AlertFormatter, DigestGroup, DigestItem};

/// Shared doubles for alerting tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::channels::NotificationChannel;
    use super::engine::ActiveAlert;
    use super::formatter::AlertDigest;
    use crate::events::Event;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// What a channel was asked to deliver.
    #[derive(Debug, Clone)]
    pub enum Delivery {
        Single(String),
        Urgent(String),
        Digest(Vec<String>),
        Report(String),
    }

    /// Channel that records every delivery.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub deliveries: Mutex<Vec<Delivery>>,
        pub fail_sends: bool,
    }

    impl RecordingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                deliveries: Mutex::new(Vec::new()),
                fail_sends: true,
            }
        }

        pub fn recorded(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, _alert: &ActiveAlert, event: &Event) -> anyhow::Result<()> {
            if self.fail_sends {
                anyhow::bail!("send failed");
            }
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Single(event.message.clone()));
            Ok(())
        }

        async fn send_urgent(
            &self,
            _alert: &ActiveAlert,
            _event: &Event,
            friendly: &str,
        ) -> anyhow::Result<()> {
            if self.fail_sends {
                anyhow::bail!("urgent send failed");
            }
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Urgent(friendly.to_string()));
            Ok(())
        }

        async fn send_digest(&self, digest: &AlertDigest) -> anyhow::Result<()> {
            if self.fail_sends {
                anyhow::bail!("digest send failed");
            }
            self.deliveries.lock().unwrap().push(Delivery::Digest(
                digest.groups.iter().map(|g| g.summary()).collect(),
            ));
            Ok(())
        }

        async fn send_investigation_report(
            &self,
            title: &str,
            _summary: &str,
        ) -> anyhow::Result<()> {
            if self.fail_sends {
                anyhow::bail!("report send failed");
            }
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Report(title.to_string()));
            Ok(())
        }
    }
}
