//! Helpers for walking documents parsed with `scraper`.

use scraper::{ElementRef, Html, Node, Selector};

/// Compile a selector that is fixed at build time.
///
/// # Panics
///
/// Panics if `css` is not a valid selector.
#[must_use]
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Text content with runs of whitespace collapsed.
#[must_use]
pub fn text(element: &ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Trimmed non-empty lines of the text content, split at text node and newline boundaries.
#[must_use]
pub fn lines(element: &ElementRef<'_>) -> Vec<String> {
    element
        .text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Text of the first match of `sel` below `element`.
#[must_use]
pub fn first_text(element: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    element.select(sel).next().map(|found| text(&found))
}

/// Text of the first match of `sel` in the whole document.
#[must_use]
pub fn document_text(document: &Html, sel: &Selector) -> Option<String> {
    document.select(sel).next().map(|found| text(&found))
}

/// Whether the element carries `class`.
#[must_use]
pub fn has_class(element: &ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|candidate| candidate == class)
}

/// Direct child elements, skipping text and comments.
pub fn child_elements<'a>(element: &ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element.children().filter_map(ElementRef::wrap)
}

/// Text of the element without the content of any descendant matching `skip`.
#[must_use]
pub fn text_without(element: &ElementRef<'_>, skip: &Selector) -> Vec<String> {
    let mut out = Vec::new();
    collect_text(element, skip, &mut out);
    out.iter()
        .flat_map(|chunk| chunk.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn collect_text(element: &ElementRef<'_>, skip: &Selector, out: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let chunk: &str = text;
                out.push(chunk.to_owned());
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    if skip.matches(&child) {
                        continue;
                    }
                    if child.value().name() == "br" {
                        out.push("\n".to_owned());
                    }
                    collect_text(&child, skip, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_splits_lines() {
        let document = Html::parse_fragment("<div> Linsen\n  eintopf <br/>mit Brot </div>");
        let div = document.select(&selector("div")).next().expect("div exists");
        assert_eq!(text(&div), "Linsen eintopf mit Brot");
        assert_eq!(lines(&div), vec!["Linsen", "eintopf", "mit Brot"]);
    }

    #[test]
    fn skips_matching_descendants() {
        let document = Html::parse_fragment("<p>Gluten<sup>1</sup>\nEi<sup>3</sup></p>");
        let para = document.select(&selector("p")).next().expect("p exists");
        assert_eq!(text_without(&para, &selector("sup")), vec!["Gluten", "Ei"]);
    }
}
