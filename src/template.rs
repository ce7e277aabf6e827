//! `{{name}}` substitution templates.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Kind};
use crate::response::Response;
use crate::status::StatusCode;

/// Variables available to [`render`].
#[derive(Default, Clone, Debug)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> TemplateContext {
        TemplateContext::default()
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Replaces every `{{name}}` with the context value for `name`.
///
/// Unknown names render empty; surrounding whitespace inside the braces is
/// ignored; an unterminated `{{` is passed through literally.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let name = after[..close].trim();
                if let Some(value) = ctx.get(name) {
                    out.push_str(value);
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Reads a template from disk.
pub fn load_file<P: AsRef<Path>>(path: P) -> crate::Result<String> {
    fs::read_to_string(path).map_err(|e| Error::new(Kind::Template).with(e))
}

impl Response {
    /// Renders a template into an HTML response.
    pub fn send_template(&mut self, status: StatusCode, template: &str, ctx: &TemplateContext) {
        let body = render(template, ctx);
        self.send_html(status, &body);
    }
}

#[cfg(test)]
mod tests {
    use super::{render, TemplateContext};
    use crate::response::Response;
    use crate::status::StatusCode;

    fn ctx(pairs: &[(&str, &str)]) -> TemplateContext {
        let mut ctx = TemplateContext::new();
        for &(k, v) in pairs {
            ctx.set(k, v);
        }
        ctx
    }

    #[test]
    fn substitutes_variables() {
        let ctx = ctx(&[("name", "World"), ("greeting", "Hello")]);
        assert_eq!(
            "Hello, World!",
            render("{{greeting}}, {{name}}!", &ctx)
        );
    }

    #[test]
    fn unknown_variables_render_empty() {
        let ctx = ctx(&[]);
        assert_eq!("-><-", render("->{{missing}}<-", &ctx));
    }

    #[test]
    fn whitespace_inside_braces_is_ignored() {
        let ctx = ctx(&[("x", "1")]);
        assert_eq!("1", render("{{ x }}", &ctx));
    }

    #[test]
    fn unterminated_braces_pass_through() {
        let ctx = ctx(&[("x", "1")]);
        assert_eq!("a {{x", render("a {{x", &ctx));
    }

    #[test]
    fn plain_text_is_untouched() {
        let ctx = ctx(&[]);
        assert_eq!("no vars here", render("no vars here", &ctx));
    }

    #[test]
    fn send_template_sets_html() {
        let ctx = ctx(&[("who", "ada")]);
        let mut res = Response::new();
        res.send_template(StatusCode::OK, "<p>{{who}}</p>", &ctx);
        assert_eq!(Some("text/html"), res.headers().get("content-type"));
        assert_eq!(b"<p>ada</p>", res.body());
    }
}
