//! Browser paywall rendering.
//!
//! Requests that look like a human behind a browser (an `Accept: text/html`
//! header plus a Mozilla user agent) get an HTML paywall instead of the JSON
//! 402 body. The page carries the payment requirements as a
//! `window.x402` config object for wallet scripts to pick up.

use x402_proto::types::PaymentRequiredResponse;

/// Display configuration for the paywall page.
#[derive(Debug, Clone)]
pub struct PaywallConfig {
    pub app_name: String,
    pub app_logo: String,
    /// Full replacement HTML; when set, served verbatim.
    pub custom_html: Option<String>,
}

impl Default for PaywallConfig {
    fn default() -> Self {
        Self {
            app_name: "x402 Service".to_string(),
            app_logo: "💰".to_string(),
            custom_html: None,
        }
    }
}

impl PaywallConfig {
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_app_logo(mut self, app_logo: impl Into<String>) -> Self {
        self.app_logo = app_logo.into();
        self
    }

    pub fn with_custom_html(mut self, html: impl Into<String>) -> Self {
        self.custom_html = Some(html.into());
        self
    }
}

/// Renders the paywall page for a 402 response.
///
/// The requirements JSON is injected into a `window.x402` script block;
/// everything user-controlled goes through JSON encoding, never raw into the
/// markup.
pub fn render_paywall(response: &PaymentRequiredResponse, config: &PaywallConfig) -> String {
    if let Some(custom) = &config.custom_html {
        return custom.clone();
    }
    let config_json = serde_json::to_string(response)
        .unwrap_or_else(|_| "{\"error\":\"serialization failed\"}".to_string());
    let app_name = html_escape(&config.app_name);
    let app_logo = html_escape(&config.app_logo);
    PAYWALL_TEMPLATE
        .replace("{{X402_CONFIG}}", &config_json)
        .replace("{{APP_NAME}}", &app_name)
        .replace("{{APP_LOGO}}", &app_logo)
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const PAYWALL_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Payment Required</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 0;
            padding: 0;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
        }
        .container {
            background: white;
            border-radius: 12px;
            box-shadow: 0 20px 40px rgba(0,0,0,0.1);
            padding: 2rem;
            max-width: 500px;
            width: 90%;
            text-align: center;
        }
        .logo { font-size: 40px; margin-bottom: 1rem; }
        h1 { color: #333; margin-bottom: 0.5rem; font-size: 1.5rem; }
        .subtitle { color: #666; margin-bottom: 1.5rem; line-height: 1.5; }
        .payment-info {
            background: #f8f9fa;
            border-radius: 8px;
            padding: 1rem;
            margin: 1rem 0;
            text-align: left;
        }
        .payment-row { display: flex; justify-content: space-between; margin-bottom: 0.5rem; }
        .label { color: #666; font-weight: 500; }
        .value { color: #333; font-weight: 600; word-break: break-all; }
        .error {
            background: #fee;
            color: #c33;
            padding: 0.75rem;
            border-radius: 6px;
            margin: 1rem 0;
            border-left: 4px solid #c33;
            display: none;
        }
    </style>
</head>
<body>
    <div class="container">
        <div class="logo">{{APP_LOGO}}</div>
        <h1>{{APP_NAME}}: Payment Required</h1>
        <div class="subtitle">
            This resource requires an x402 payment. Connect a wallet that
            speaks the x402 protocol and retry the request.
        </div>
        <div id="payment-details" class="payment-info"></div>
        <div id="error-message" class="error"></div>
    </div>
    <script>
        window.x402 = {{X402_CONFIG}};
        document.addEventListener('DOMContentLoaded', function() {
            const config = window.x402;
            const details = document.getElementById('payment-details');
            (config.accepts || []).forEach(function(req) {
                const row = document.createElement('div');
                row.className = 'payment-row';
                const label = document.createElement('span');
                label.className = 'label';
                label.textContent = req.network;
                const value = document.createElement('span');
                value.className = 'value';
                value.textContent = (req.amount || req.amountRequired) + ' → ' + req.payTo;
                row.appendChild(label);
                row.appendChild(value);
                details.appendChild(row);
            });
            if (config.error) {
                const error = document.getElementById('error-message');
                error.textContent = config.error;
                error.style.display = 'block';
            }
        });
    </script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use x402_proto::types::X402Version;

    fn response() -> PaymentRequiredResponse {
        PaymentRequiredResponse {
            x402_version: X402Version::V2,
            error: "X-PAYMENT header is required".into(),
            resource: None,
            accepts: vec![],
            payer: None,
        }
    }

    #[test]
    fn injects_requirements_config() {
        let html = render_paywall(&response(), &PaywallConfig::default());
        assert!(html.contains("window.x402 = {"));
        assert!(html.contains("X-PAYMENT header is required"));
        assert!(html.contains("x402 Service"));
    }

    #[test]
    fn escapes_app_name() {
        let config = PaywallConfig::default().with_app_name("<script>alert(1)</script>");
        let html = render_paywall(&response(), &config);
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn custom_html_wins() {
        let config = PaywallConfig::default().with_custom_html("<html>mine</html>");
        let html = render_paywall(&response(), &config);
        assert_eq!(html, "<html>mine</html>");
    }
}
