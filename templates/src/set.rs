//! Template sets: override merging and placeholder rendering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

/// A single prompt template as stored in a `prompts.json` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// The prompt body, with `{name}` placeholders.
    pub base_prompt: String,
    /// Optional wrapper applied when the user supplies extra instructions.
    ///
    /// Rendered with `{base_prompt}` and `{user_prompt}` bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt_template: Option<String>,
}

impl PromptTemplate {
    /// Creates a template without a user-prompt wrapper.
    #[must_use]
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            user_prompt_template: None,
        }
    }

    /// Sets the wrapper used when a user prompt is supplied.
    #[must_use]
    pub fn with_user_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.user_prompt_template = Some(template.into());
        self
    }
}

/// Raw contents of a prompts file: template key to template.
pub type TemplateMap = BTreeMap<String, PromptTemplate>;

/// The resolved templates for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateSet {
    templates: TemplateMap,
}

impl TemplateSet {
    /// Builds a set from a single template map.
    #[must_use]
    pub const fn new(templates: TemplateMap) -> Self {
        Self { templates }
    }

    /// Merges project overrides over the global defaults.
    ///
    /// An override replaces the whole default entry for its key; keys absent
    /// from `overrides` inherit the default.
    #[must_use]
    pub fn merged(defaults: TemplateMap, overrides: TemplateMap) -> Self {
        let mut templates = defaults;
        templates.extend(overrides);
        Self { templates }
    }

    /// Looks up a template by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.templates.get(key)
    }

    /// Iterates over template keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Number of templates in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true when the set holds no templates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Renders the template `key` into a final prompt.
    ///
    /// The base prompt is rendered with `vars`. When `user_prompt` is not blank
    /// and the template defines a `user_prompt_template`, that wrapper is
    /// rendered with `base_prompt` and `user_prompt` bound; otherwise the
    /// rendered base prompt is returned as is.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use metanovel_templates::{PromptTemplate, TemplateSet};
    ///
    /// let mut map = BTreeMap::new();
    /// map.insert(
    ///     "greet".to_string(),
    ///     PromptTemplate::new("Hello {name}").with_user_prompt_template("{base_prompt}\nExtra: {user_prompt}"),
    /// );
    /// let set = TemplateSet::new(map);
    /// let vars = BTreeMap::from([("name".to_string(), "Ada".to_string())]);
    ///
    /// assert_eq!(set.render("greet", "", &vars).unwrap(), "Hello Ada");
    /// assert_eq!(set.render("greet", "be brief", &vars).unwrap(), "Hello Ada\nExtra: be brief");
    /// ```
    pub fn render(
        &self,
        key: &str,
        user_prompt: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let template = self
            .get(key)
            .ok_or_else(|| TemplateError::MissingTemplate(key.to_string()))?;

        let base_prompt = render_placeholders(key, &template.base_prompt, vars)?;

        let user_prompt = user_prompt.trim();
        match &template.user_prompt_template {
            Some(wrapper) if !user_prompt.is_empty() => {
                let mut bound = BTreeMap::new();
                bound.insert("base_prompt".to_string(), base_prompt);
                bound.insert("user_prompt".to_string(), user_prompt.to_string());
                render_placeholders(key, wrapper, &bound)
            }
            _ => Ok(base_prompt),
        }
    }
}

/// Substitutes `{name}` placeholders from `vars`.
///
/// `{{` and `}}` produce literal braces. A lone `}` is copied through.
pub fn render_placeholders(
    key: &str,
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut consumed = 0;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            consumed += pos + 2;
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            consumed += pos + 2;
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            consumed += pos + 1;
            continue;
        }

        let Some(close) = tail.find('}') else {
            return Err(TemplateError::UnterminatedPlaceholder {
                key: key.to_string(),
                offset: consumed + pos,
            });
        };
        let name = tail[1..close].trim();
        let value = vars.get(name).ok_or_else(|| TemplateError::MissingVariable {
            key: key.to_string(),
            variable: name.to_string(),
        })?;
        out.push_str(value);
        rest = &tail[close + 1..];
        consumed += pos + close + 1;
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_placeholders_substitutes_and_escapes() {
        let rendered =
            render_placeholders("t", "Theme: {theme} {{literal}}", &vars(&[("theme", "sea")]))
                .unwrap();
        assert_eq!(rendered, "Theme: sea {literal}");
    }

    #[test]
    fn test_render_placeholders_missing_variable() {
        let err = render_placeholders("t", "Hi {who}", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable { ref variable, .. } if variable == "who"));
        assert!(err.to_string().contains("{who}"));
    }

    #[test]
    fn test_render_placeholders_unterminated() {
        let err = render_placeholders("t", "ab {oops", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::UnterminatedPlaceholder { offset: 3, .. }));
    }

    #[test]
    fn test_render_placeholders_multibyte_text() {
        let rendered =
            render_placeholders("t", "主题：{theme}。", &vars(&[("theme", "海")])).unwrap();
        assert_eq!(rendered, "主题：海。");
    }

    #[test]
    fn test_merged_overrides_replace_whole_entries() {
        let defaults = TemplateMap::from([
            ("a".to_string(), PromptTemplate::new("default a")),
            ("b".to_string(), PromptTemplate::new("default b")),
        ]);
        let overrides = TemplateMap::from([("a".to_string(), PromptTemplate::new("project a"))]);

        let set = TemplateSet::merged(defaults, overrides);
        assert_eq!(set.get("a").unwrap().base_prompt, "project a");
        assert_eq!(set.get("b").unwrap().base_prompt, "default b");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_render_ignores_blank_user_prompt() {
        let set = TemplateSet::new(TemplateMap::from([(
            "k".to_string(),
            PromptTemplate::new("base").with_user_prompt_template("{base_prompt} + {user_prompt}"),
        )]));
        assert_eq!(set.render("k", "   ", &BTreeMap::new()).unwrap(), "base");
        assert_eq!(set.render("k", " more ", &BTreeMap::new()).unwrap(), "base + more");
    }

    #[test]
    fn test_render_missing_template() {
        let set = TemplateSet::default();
        assert!(matches!(
            set.render("nope", "", &BTreeMap::new()),
            Err(TemplateError::MissingTemplate(_))
        ));
    }
}
