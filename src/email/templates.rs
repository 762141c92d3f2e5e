//! Email template rendering: stored overrides with graceful fallback to the
//! built-ins embedded at build time.
//!
//! Templates render with strict undefined behavior, so a typo'd variable in a
//! stored override produces a deterministic error instead of silently empty
//! output — and a failing override falls back to the built-in rather than
//! failing the send. Subjects render as plain text; HTML bodies render with
//! auto-escaping.

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use sqlx::PgPool;
use tracing::instrument;

use crate::db::errors::DbError;
use crate::db::handlers::EmailTemplates;
use crate::db::models::email_templates::{EmailTemplate, EmailTemplateUpsertDBRequest, MAX_HTML_LEN, MAX_SUBJECT_LEN};
use crate::errors::{Error, Result};

/// A fully rendered message.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Built-in templates, embedded at build time. The subject strings reference
/// no variables and every body variable has a default, so built-ins render
/// against any input.
fn builtin(key: &str) -> Option<(&'static str, &'static str)> {
    match key {
        "auth.password_reset" => Some(("Reset your password", include_str!("../../email_templates/password_reset.html"))),
        "auth.verify_email" => Some(("Confirm your email address", include_str!("../../email_templates/verify_email.html"))),
        "auth.otp" => Some(("Your one-time code", include_str!("../../email_templates/otp.html"))),
        _ => None,
    }
}

/// All built-in keys, for the admin listing.
pub fn builtin_keys() -> &'static [&'static str] {
    &["auth.otp", "auth.password_reset", "auth.verify_email"]
}

/// Validate a template key: dotted lowercase segments, at least two.
pub fn validate_template_key(key: &str) -> Result<()> {
    let segments: Vec<&str> = key.split('.').collect();
    let segment_ok = |s: &str, first: bool| -> bool {
        let mut chars = s.chars();
        let Some(head) = chars.next() else { return false };
        if !head.is_ascii_lowercase() {
            return false;
        }
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || (!first && c == '_'))
    };
    let ok = segments.len() >= 2
        && segment_ok(segments[0], true)
        && segments[1..].iter().all(|s| segment_ok(s, false));
    if ok {
        Ok(())
    } else {
        Err(Error::bad_field(format!("invalid template key {key}"), "template_key"))
    }
}

/// Render subject and body against `vars`. Strict: undefined variables error.
fn render_parts(subject_template: &str, html_template: &str, vars: &serde_json::Value) -> std::result::Result<(String, String), minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|name| if name.ends_with(".html") { AutoEscape::Html } else { AutoEscape::None });
    env.add_template("subject.txt", subject_template)?;
    env.add_template("body.html", html_template)?;
    let subject = env.get_template("subject.txt")?.render(vars)?;
    let html = env.get_template("body.html")?.render(vars)?;
    Ok((subject.trim().to_string(), html))
}

/// Derive a plaintext part from HTML: strip tags, decode the common
/// entities, collapse blank runs.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut chars = html.char_indices().peekable();
    let lower = html.to_ascii_lowercase();
    let mut skip_until: Option<&'static str> = None;

    while let Some((i, c)) = chars.next() {
        if let Some(end_tag) = skip_until {
            if c == '<' && lower[i..].starts_with(end_tag) {
                skip_until = None;
                // Consume through the closing '>'.
                for (_, t) in chars.by_ref() {
                    if t == '>' {
                        break;
                    }
                }
            }
            continue;
        }
        if c == '<' {
            let rest = &lower[i..];
            if rest.starts_with("<script") {
                skip_until = Some("</script");
                continue;
            }
            if rest.starts_with("<style") {
                skip_until = Some("</style");
                continue;
            }
            // Block-level boundaries become line breaks.
            if rest.starts_with("<br")
                || rest.starts_with("</p")
                || rest.starts_with("</div")
                || rest.starts_with("</li")
                || rest.starts_with("</h1")
                || rest.starts_with("</h2")
                || rest.starts_with("</h3")
                || rest.starts_with("</h4")
                || rest.starts_with("</tr")
            {
                out.push('\n');
            }
            for (_, t) in chars.by_ref() {
                if t == '>' {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2f;", "/")
        .replace("&#x2F;", "/")
        .replace("&amp;", "&");

    // Trim each line and collapse runs of blank lines.
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in decoded.lines() {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !lines.is_empty() {
                lines.push("");
            }
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }
    while lines.last() == Some(&"") {
        lines.pop();
    }
    lines.join("\n")
}

pub struct TemplateService {
    pool: PgPool,
}

impl TemplateService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Render `key` against `vars`: the stored, enabled override first; on
    /// any override failure, fall back to the built-in. `NoTemplate` (404)
    /// only when neither exists.
    #[instrument(skip(self, vars), err)]
    pub async fn render_with_fallback(&self, key: &str, vars: &serde_json::Value) -> Result<Rendered> {
        let stored = self.get(key).await?;

        if let Some(template) = stored.filter(|t| t.enabled) {
            match render_parts(&template.subject_template, &template.html_template, vars) {
                Ok((subject, html)) => {
                    let text = html_to_text(&html);
                    return Ok(Rendered { subject, html, text });
                }
                Err(e) => {
                    tracing::error!(key, error = %e, "Stored template failed to render, falling back to built-in");
                }
            }
        }

        let (subject_template, html_template) =
            builtin(key).ok_or_else(|| Error::not_found("email template", key))?;
        let (subject, html) = render_parts(subject_template, html_template, vars).map_err(|e| Error::Internal {
            operation: format!("render built-in template {key}: {e}"),
        })?;
        let text = html_to_text(&html);
        Ok(Rendered { subject, html, text })
    }

    /// Render arbitrary template sources without persisting anything.
    pub fn preview(&self, subject_template: &str, html_template: &str, vars: &serde_json::Value) -> Result<Rendered> {
        validate_sizes(subject_template, html_template)?;
        let (subject, html) = render_parts(subject_template, html_template, vars)
            .map_err(|e| Error::bad_request(format!("template failed to render: {e}")))?;
        let text = html_to_text(&html);
        Ok(Rendered { subject, html, text })
    }

    /// Save an override. Size limits apply before parse; parse errors are
    /// returned with the offending detail and nothing is stored.
    #[instrument(skip(self, subject_template, html_template), err)]
    pub async fn upsert(&self, key: &str, subject_template: &str, html_template: &str, enabled: bool) -> Result<EmailTemplate> {
        validate_template_key(key)?;
        validate_sizes(subject_template, html_template)?;
        if let Err(e) = render_parse_check(subject_template, html_template) {
            return Err(Error::BadRequest {
                message: format!("template parse failed: {e}"),
                field: Some("html_template".to_string()),
            });
        }

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let template = EmailTemplates::new(&mut conn)
            .upsert(&EmailTemplateUpsertDBRequest {
                template_key: key.to_string(),
                subject_template: subject_template.to_string(),
                html_template: html_template.to_string(),
                enabled,
            })
            .await?;
        Ok(template)
    }

    pub async fn get(&self, key: &str) -> Result<Option<EmailTemplate>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let template = EmailTemplates::new(&mut conn).get(key).await?;
        Ok(template)
    }

    pub async fn list(&self) -> Result<Vec<EmailTemplate>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let templates = EmailTemplates::new(&mut conn).list().await?;
        Ok(templates)
    }

    pub async fn set_enabled(&self, key: &str, enabled: bool) -> Result<EmailTemplate> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        EmailTemplates::new(&mut conn)
            .set_enabled(key, enabled)
            .await?
            .ok_or_else(|| Error::not_found("email template", key))
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        if !EmailTemplates::new(&mut conn).delete(key).await? {
            return Err(Error::not_found("email template", key));
        }
        Ok(())
    }
}

fn validate_sizes(subject_template: &str, html_template: &str) -> Result<()> {
    if subject_template.len() > MAX_SUBJECT_LEN {
        return Err(Error::bad_field(
            format!("subject template exceeds {MAX_SUBJECT_LEN} characters"),
            "subject_template",
        ));
    }
    if html_template.len() > MAX_HTML_LEN {
        return Err(Error::bad_field(
            format!("html template exceeds {MAX_HTML_LEN} characters"),
            "html_template",
        ));
    }
    Ok(())
}

/// Parse-only check used on save; rendering happens against real vars later.
fn render_parse_check(subject_template: &str, html_template: &str) -> std::result::Result<(), minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("subject.txt", subject_template)?;
    env.add_template("body.html", html_template)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_keys_follow_the_dotted_format() {
        assert!(validate_template_key("auth.password_reset").is_ok());
        assert!(validate_template_key("billing.invoice.overdue").is_ok());
        assert!(validate_template_key("a1.b2").is_ok());
        assert!(validate_template_key("auth").is_err());
        assert!(validate_template_key("Auth.reset").is_err());
        assert!(validate_template_key("auth.").is_err());
        assert!(validate_template_key(".reset").is_err());
        assert!(validate_template_key("auth._reset").is_err());
        assert!(validate_template_key("au-th.reset").is_err());
    }

    #[test]
    fn rendering_substitutes_and_escapes() {
        let (subject, html) = render_parts("Hi {{ name }}", "<p>Hello {{ name }}</p>", &json!({"name": "<b>Ada</b>"})).unwrap();
        // The HTML body auto-escapes; the subject does not.
        assert_eq!(subject, "Hi <b>Ada</b>");
        assert!(html.contains("&lt;b&gt;Ada"));
        assert!(!html.contains("<b>Ada"));
        assert!(html.starts_with("<p>Hello "));
    }

    #[test]
    fn undefined_variables_error_instead_of_vanishing() {
        let result = render_parts("Hi {{ name }}", "<p>ok</p>", &json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn builtins_render_against_empty_vars() {
        for key in builtin_keys() {
            let (subject_template, html_template) = builtin(key).unwrap();
            let rendered = render_parts(subject_template, html_template, &json!({}));
            assert!(rendered.is_ok(), "built-in {key} must render with no vars");
        }
    }

    #[test]
    fn html_to_text_strips_tags_and_decodes_entities() {
        let html = "<p>Hello &amp; welcome</p><p>Second&nbsp;line</p><script>var x = 1;</script>";
        let text = html_to_text(html);
        assert_eq!(text, "Hello & welcome\nSecond line");
        assert!(!text.contains("var x"));
    }

    #[test]
    fn html_to_text_collapses_blank_runs() {
        let html = "<div>a</div>\n\n\n\n<div>b</div>";
        let text = html_to_text(html);
        assert_eq!(text, "a\nb");
    }

    #[test]
    fn plain_text_survives_escape_then_strip() {
        // Round trip: escaping for HTML then stripping agrees with the
        // original after whitespace collapse.
        let inputs = ["hello world", "a < b & c > d", "it's \"quoted\""];
        for input in inputs {
            let (_, html) = render_parts("s", "<p>{{ v }}</p>", &json!({"v": input})).unwrap();
            let text = html_to_text(&html);
            assert_eq!(text, input.trim());
        }
    }

    #[test]
    fn size_limits_are_enforced_before_parse() {
        let long_subject = "s".repeat(MAX_SUBJECT_LEN + 1);
        assert!(validate_sizes(&long_subject, "x").is_err());
        let long_html = "h".repeat(MAX_HTML_LEN + 1);
        assert!(validate_sizes("s", &long_html).is_err());
        assert!(validate_sizes("s", "h").is_ok());
    }

    #[test]
    fn parse_check_reports_broken_syntax() {
        assert!(render_parse_check("ok", "{% if %}").is_err());
        assert!(render_parse_check("{{ unclosed", "ok").is_err());
        assert!(render_parse_check("ok", "<p>{{ fine }}</p>").is_ok());
    }
}
