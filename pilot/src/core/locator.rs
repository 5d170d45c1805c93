//! Element location strategies for the browser effector.

/// A WebDriver element query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    /// W3C `using` value.
    pub fn strategy(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css selector",
            Locator::XPath(_) => "xpath",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::Css(value) | Locator::XPath(value) => value,
        }
    }
}

/// Tag order tried when clicking by visible text. `*` matches any element.
const TEXT_TAGS: [&str; 5] = ["button", "a", "span", "div", "*"];

/// Queries for an element containing `text`, in lookup order.
///
/// The caller stops at the first query that matches.
pub fn text_locators(text: &str) -> Vec<Locator> {
    let literal = xpath_literal(text);
    TEXT_TAGS
        .iter()
        .map(|tag| Locator::XPath(format!("//{tag}[contains(text(), {literal})]")))
        .collect()
}

/// Quote `text` as an XPath 1.0 string literal.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<String> = text.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}
