use futures::future::BoxFuture;
use tracing::info;

use certflow_core::error::Result;
use certflow_core::registry::ProviderFactoryOptions;
use certflow_core::traits::Notifier;

use crate::util::{HttpSettings, WebhookSettings};

/// Sends notifications to an HTTP endpoint as `{"subject", "message"}` or
/// through a body template using `${SUBJECT}` and `${MESSAGE}`.
pub struct WebhookNotifier {
    settings: WebhookSettings,
    http: HttpSettings,
}

impl WebhookNotifier {
    pub fn new(options: &ProviderFactoryOptions, http: HttpSettings) -> Result<Self> {
        Ok(Self {
            settings: WebhookSettings::merge(
                "webhook",
                &options.access_config,
                &options.provider_config,
            )?,
            http,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, subject: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let vars = [("SUBJECT", subject), ("MESSAGE", message)];
            self.settings.send("webhook", &self.http, &vars).await?;
            info!(url = %self.settings.url, "Notification sent via webhook");
            Ok(())
        })
    }
}
