//! Filename pattern templating.
//!
//! Patterns contain `{placeholder}` tokens expanded per delivery. Unknown
//! placeholders are rejected at configuration load time so a typo never
//! surfaces mid-run. Metadata-derived components (pipeline, provider,
//! format) are sanitized so configuration can never smuggle path
//! separators into a rendered filename.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::loader::ConfigError;

pub const PLACEHOLDERS: [&str; 12] = [
    "date",
    "time",
    "timestamp",
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "second",
    "pipeline",
    "provider",
    "format",
];

const DATE: &[BorrowedFormatItem<'_>] = format_description!("[year][month][day]");
const TIME: &[BorrowedFormatItem<'_>] = format_description!("[hour][minute][second]");

/// Run metadata available to placeholders.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub pipeline: String,
    pub provider: String,
    pub format: String,
    pub generated_at: OffsetDateTime,
}

/// Reject patterns containing unknown placeholders or no file name at all.
pub fn validate_pattern(pipeline: &str, pattern: &str) -> Result<(), ConfigError> {
    if pattern.trim().is_empty() {
        return Err(ConfigError::InvalidPattern {
            pipeline: pipeline.to_owned(),
            pattern: pattern.to_owned(),
            detail: String::from("filename pattern is empty"),
        });
    }

    for token in placeholder_tokens(pattern) {
        let token = token.map_err(|detail| ConfigError::InvalidPattern {
            pipeline: pipeline.to_owned(),
            pattern: pattern.to_owned(),
            detail,
        })?;
        if !PLACEHOLDERS.contains(&token) {
            return Err(ConfigError::InvalidPattern {
                pipeline: pipeline.to_owned(),
                pattern: pattern.to_owned(),
                detail: format!("unknown placeholder '{{{token}}}'"),
            });
        }
    }
    Ok(())
}

/// Expand every placeholder. Patterns reaching here already validated.
pub fn render_pattern(pattern: &str, ctx: &TemplateContext) -> String {
    let ts = ctx.generated_at;
    let date = ts.format(DATE).unwrap_or_default();
    let time = ts.format(TIME).unwrap_or_default();

    pattern
        .replace("{date}", &date)
        .replace("{time}", &time)
        .replace("{timestamp}", &format!("{date}_{time}"))
        .replace("{year}", &format!("{:04}", ts.year()))
        .replace("{month}", &format!("{:02}", u8::from(ts.month())))
        .replace("{day}", &format!("{:02}", ts.day()))
        .replace("{hour}", &format!("{:02}", ts.hour()))
        .replace("{minute}", &format!("{:02}", ts.minute()))
        .replace("{second}", &format!("{:02}", ts.second()))
        .replace("{pipeline}", &sanitize_component(&ctx.pipeline))
        .replace("{provider}", &sanitize_component(&ctx.provider))
        .replace("{format}", &sanitize_component(&ctx.format))
}

/// Keep alphanumerics, dash, underscore, and dot; everything else becomes
/// an underscore. Prevents metadata values from escaping the target
/// directory.
pub fn sanitize_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim_matches('.');
    if trimmed.is_empty() {
        String::from("unnamed")
    } else {
        trimmed.to_owned()
    }
}

/// Iterate `{token}` occurrences; an unbalanced brace is an error string.
fn placeholder_tokens(pattern: &str) -> impl Iterator<Item = Result<&str, String>> {
    let mut rest = pattern;
    std::iter::from_fn(move || {
        let open = rest.find('{')?;
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let token = &after[..close];
                rest = &after[close + 1..];
                Some(Ok(token))
            }
            None => {
                rest = "";
                Some(Err(String::from("unbalanced '{' in pattern")))
            }
        }
    })
}
