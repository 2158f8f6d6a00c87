/// A single element-location pattern.
///
/// An ordered slice of descriptors expresses the same logical control
/// defensively across UI variants (attribute names, languages, casing).
/// Order encodes preference: the first descriptor that resolves to a visible
/// element wins and later ones are never tried.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// Match by CSS selector
    Css(String),

    /// Match elements under `selector` whose inner text contains `contains`,
    /// case- and accent-insensitively
    Text { selector: String, contains: String },

    /// Match elements under `selector` whose `attribute` value contains
    /// `contains` verbatim
    Attr { selector: String, attribute: String, contains: String },
}

impl Descriptor {
    pub fn css(selector: impl Into<String>) -> Self {
        Descriptor::Css(selector.into())
    }

    pub fn text(selector: impl Into<String>, contains: impl Into<String>) -> Self {
        Descriptor::Text { selector: selector.into(), contains: contains.into() }
    }

    pub fn attr(selector: impl Into<String>, attribute: impl Into<String>, contains: impl Into<String>) -> Self {
        Descriptor::Attr { selector: selector.into(), attribute: attribute.into(), contains: contains.into() }
    }

    /// CSS selector used to enumerate candidate elements for this descriptor
    pub fn base_selector(&self) -> &str {
        match self {
            Descriptor::Css(selector) => selector,
            Descriptor::Text { selector, .. } => selector,
            Descriptor::Attr { selector, .. } => selector,
        }
    }

    /// Whether a candidate's text / attribute payload satisfies this
    /// descriptor. The CSS pre-filter is applied by the query itself.
    pub fn matches_payload(&self, text: Option<&str>, attribute: Option<&str>) -> bool {
        match self {
            Descriptor::Css(_) => true,
            Descriptor::Text { contains, .. } => {
                text.map(|t| fold(t).contains(&fold(contains))).unwrap_or(false)
            }
            Descriptor::Attr { contains, .. } => {
                attribute.map(|a| a.contains(contains.as_str())).unwrap_or(false)
            }
        }
    }
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Descriptor::Css(selector) => write!(f, "css({})", selector),
            Descriptor::Text { selector, contains } => write!(f, "text({}, \"{}\")", selector, contains),
            Descriptor::Attr { selector, attribute, contains } => {
                write!(f, "attr({}, {}~=\"{}\")", selector, attribute, contains)
            }
        }
    }
}

/// Case-fold and strip the accents the portal mixes freely into labels
pub fn fold(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ã' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'õ' | 'ô' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            _ => c,
        })
        .collect()
}

/// Render a candidate chain for error messages
pub fn describe(candidates: &[Descriptor]) -> String {
    candidates.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_accents_and_case() {
        assert_eq!(fold("Consultar Vários Objetos"), "consultar varios objetos");
        assert_eq!(fold("AÇÃO"), "acao");
        assert_eq!(fold("Pesquisar"), "pesquisar");
    }

    #[test]
    fn test_text_descriptor_matches_folded() {
        let d = Descriptor::text("a", "consultar varios objetos");
        assert!(d.matches_payload(Some("  Consultar Vários Objetos  "), None));
        assert!(!d.matches_payload(Some("Consultar um objeto"), None));
        assert!(!d.matches_payload(None, None));
    }

    #[test]
    fn test_attr_descriptor_is_verbatim() {
        let d = Descriptor::attr("a[onclick]", "onclick", "verArDigital('YA1'");
        assert!(d.matches_payload(None, Some("javascript:verArDigital('YA1');")));
        // Attribute matching is case-sensitive, unlike text matching
        assert!(!d.matches_payload(None, Some("verardigital('ya1')")));
        assert!(!d.matches_payload(None, None));
    }

    #[test]
    fn test_css_descriptor_needs_no_payload() {
        let d = Descriptor::css("input#username");
        assert!(d.matches_payload(None, None));
        assert_eq!(d.base_selector(), "input#username");
    }

    #[test]
    fn test_describe_joins_in_order() {
        let chain = [Descriptor::css("#a"), Descriptor::text("a", "entrar")];
        let rendered = describe(&chain);
        let a = rendered.find("#a").unwrap();
        let b = rendered.find("entrar").unwrap();
        assert!(a < b);
    }
}
