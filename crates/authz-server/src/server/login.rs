//! HTML pages for the login, consent and logout steps.
//!
//! Every interpolated value is HTML-escaped.

use crate::oauth::ConsentView;

const STYLE: &str = r#"<style>
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }
.card { background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }
h1 { font-size: 20px; margin: 0 0 8px; color: #333; }
.subtitle { color: #666; font-size: 14px; margin: 0 0 24px; }
.alert { background: #fee; border: 1px solid #c00; color: #c00; padding: 10px; border-radius: 4px; margin-bottom: 16px; }
label { display: block; font-size: 14px; font-weight: 500; margin: 12px 0 6px; color: #333; }
input[type="text"], input[type="password"] { width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; }
ul.scopes { list-style: none; padding: 0; }
ul.scopes li { padding: 4px 0; }
button { width: 100%; padding: 10px; background: #4a90d9; color: #fff; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 16px; }
button.secondary { background: #999; }
</style>"#;

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>{title}</title>
{STYLE}
</head>
<body>
<div class="card">
{body}
</div>
</body>
</html>"#,
        title = html_escape(title),
    )
}

fn alert(message: Option<&str>) -> String {
    message
        .map(|msg| format!(r#"<div class="alert">{}</div>"#, html_escape(msg)))
        .unwrap_or_default()
}

/// Render the sign-in form. `flow_id` ties the form to a pending
/// authorization request; without one the login only establishes a session.
#[must_use]
pub fn render_login_page(flow_id: Option<&str>, error_message: Option<&str>) -> String {
    let flow_field = flow_id
        .map(|id| format!(r#"<input type="hidden" name="flow" value="{}">"#, html_escape(id)))
        .unwrap_or_default();

    let body = format!(
        r#"<h1>Sign in</h1>
<p class="subtitle">Sign in to continue</p>
{error_html}
<form method="POST" action="/login">
{flow_field}
<label for="username">Username</label>
<input type="text" id="username" name="username" autocomplete="username" required autofocus>
<label for="password">Password</label>
<input type="password" id="password" name="password" autocomplete="current-password" required>
<button type="submit">Sign in</button>
</form>"#,
        error_html = alert(error_message),
    );
    page("Sign in", &body)
}

/// Render the consent screen for a pending flow.
#[must_use]
pub fn render_consent_page(view: &ConsentView) -> String {
    let scopes: String = view
        .scopes
        .iter()
        .map(|scope| {
            let scope = html_escape(scope);
            format!(
                r#"<li><label><input type="checkbox" name="scope" value="{scope}" checked> {scope}</label></li>"#
            )
        })
        .collect();

    let body = format!(
        r#"<h1>Authorize {client_name}</h1>
<p class="subtitle"><strong>{client_name}</strong> ({client_id}) is requesting access</p>
<form method="POST" action="/oauth2/consent">
<input type="hidden" name="flow" value="{flow_id}">
<ul class="scopes">{scopes}</ul>
<button type="submit" name="decision" value="approve">Approve</button>
<button type="submit" name="decision" value="deny" class="secondary">Deny</button>
</form>"#,
        client_name = html_escape(&view.client_name),
        client_id = html_escape(&view.client_id),
        flow_id = html_escape(&view.flow_id),
    );
    page("Authorize", &body)
}

/// Render a plain informational page.
#[must_use]
pub fn render_message_page(title: &str, message: &str) -> String {
    let body = format!(
        r#"<h1>{}</h1>
<p class="subtitle">{}</p>"#,
        html_escape(title),
        html_escape(message)
    );
    page(title, &body)
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
