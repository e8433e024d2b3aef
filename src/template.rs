//! Compiled destination-path templates.
//!
//! Templates with `{user}`/`{coll}`/etc. placeholders are pre-parsed once
//! instead of repeatedly scanning the string, with an explicit missing-key
//! policy (substitute the empty string, then collapse repeated `/`).

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(Var),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    User,
    Coll,
    Hostname,
    Timestamp,
}

/// A path template compiled once at `File Manager` construction time and
/// resolved many times, one per capture.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

/// The variables a template resolves against. Missing fields default to
/// the empty string.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub user: Option<String>,
    pub coll: Option<String>,
    pub hostname: Option<String>,
    pub timestamp: Option<String>,
}

impl PathTemplate {
    /// Parses `{user}`, `{coll}`, `{hostname}`, and `{timestamp}`
    /// placeholders out of `template`. Unknown `{...}` placeholders are
    /// kept as literal text.
    pub fn compile(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '{' {
                literal.push(ch);
                continue;
            }

            let mut name = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == '}' {
                    closed = true;
                    break;
                }
                name.push(inner);
            }

            let var = closed.then(|| match name.as_str() {
                "user" => Some(Var::User),
                "coll" => Some(Var::Coll),
                "hostname" => Some(Var::Hostname),
                "timestamp" => Some(Var::Timestamp),
                _ => None,
            }).flatten();

            match var {
                Some(var) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(var));
                }
                None => {
                    literal.push('{');
                    literal.push_str(&name);
                    if closed {
                        literal.push('}');
                    }
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        return Self { segments };
    }

    /// Substitutes every recognized variable and collapses consecutive
    /// slashes introduced by missing keys.
    pub fn resolve(&self, ctx: &TemplateContext) -> String {
        let mut resolved = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => resolved.push_str(text),
                Segment::Var(Var::User) => {
                    resolved.push_str(ctx.user.as_deref().unwrap_or_default());
                }
                Segment::Var(Var::Coll) => {
                    resolved.push_str(ctx.coll.as_deref().unwrap_or_default());
                }
                Segment::Var(Var::Hostname) => {
                    resolved.push_str(ctx.hostname.as_deref().unwrap_or_default());
                }
                Segment::Var(Var::Timestamp) => {
                    resolved.push_str(ctx.timestamp.as_deref().unwrap_or_default());
                }
            }
        }

        return collapse_slashes(&resolved);
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(ch);
    }
    return collapsed;
}

#[cfg(test)]
mod tests {
    use super::{PathTemplate, TemplateContext};
    use pretty_assertions::assert_eq;

    #[test]
    fn substitutes_known_variables() {
        let template = PathTemplate::compile("warcs/{user}/{coll}/rec-{timestamp}.warc.gz");
        let ctx = TemplateContext {
            user: Some("USER".to_owned()),
            coll: Some("COLL".to_owned()),
            hostname: None,
            timestamp: Some("20260101000000".to_owned()),
        };
        assert_eq!(
            template.resolve(&ctx),
            "warcs/USER/COLL/rec-20260101000000.warc.gz"
        );
    }

    #[test]
    fn missing_keys_default_to_empty_and_slashes_collapse() {
        let template = PathTemplate::compile("warcs/{user}/{coll}/data.warc.gz");
        let ctx = TemplateContext::default();
        assert_eq!(template.resolve(&ctx), "warcs/data.warc.gz");
    }

    #[test]
    fn unknown_placeholder_kept_literal() {
        let template = PathTemplate::compile("warcs/{nope}/data.warc.gz");
        let ctx = TemplateContext::default();
        assert_eq!(template.resolve(&ctx), "warcs/{nope}/data.warc.gz");
    }
}
