//! Minimal XML reader for node-description messages
//!
//! Only elements and attributes matter; text content is ignored. Comments,
//! processing instructions and doctype declarations are skipped.

use crate::error::{SceneError, SceneResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    /// Byte offset of the opening `<`
    pub position: usize,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Parse every top-level element of `input`
pub fn parse_markup(input: &str) -> SceneResult<Vec<Element>> {
    let mut reader = MarkupReader { src: input, pos: 0 };
    reader.read_content(None)
}

struct MarkupReader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> MarkupReader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, message: impl Into<String>) -> SceneError {
        SceneError::MalformedMarkup {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn expect(&mut self, token: &str) -> SceneResult<()> {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", token)))
        }
    }

    /// Skip past the next occurrence of `terminator`
    fn skip_past(&mut self, terminator: &str, what: &str) -> SceneResult<()> {
        match self.rest().find(terminator) {
            Some(offset) => {
                self.pos += offset + terminator.len();
                Ok(())
            }
            None => Err(self.error(format!("unterminated {}", what))),
        }
    }

    fn read_name(&mut self) -> SceneResult<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    /// Read sibling elements until `closing` is closed, or until end of input
    /// at top level
    fn read_content(&mut self, closing: Option<&str>) -> SceneResult<Vec<Element>> {
        let mut elements = Vec::new();
        loop {
            match self.rest().find('<') {
                Some(offset) => self.pos += offset,
                None => {
                    self.pos = self.src.len();
                    return match closing {
                        Some(tag) => Err(self.error(format!("unclosed tag <{}>", tag))),
                        None => Ok(elements),
                    };
                }
            }

            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if rest.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if rest.starts_with("<!") {
                self.skip_past(">", "declaration")?;
            } else if rest.starts_with("</") {
                let start = self.pos;
                self.pos += 2;
                let name = self.read_name()?;
                self.skip_whitespace();
                self.expect(">")?;
                return match closing {
                    Some(tag) if tag == name => Ok(elements),
                    Some(tag) => Err(SceneError::MalformedMarkup {
                        position: start,
                        message: format!("mismatched close tag </{}>, expected </{}>", name, tag),
                    }),
                    None => Err(SceneError::MalformedMarkup {
                        position: start,
                        message: format!("unexpected close tag </{}>", name),
                    }),
                };
            } else {
                elements.push(self.read_element()?);
            }
        }
    }

    fn read_element(&mut self) -> SceneResult<Element> {
        let position = self.pos;
        self.expect("<")?;
        let tag = self.read_name()?.to_string();
        let mut attributes = Vec::new();

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(Element {
                    tag,
                    attributes,
                    children: Vec::new(),
                    position,
                });
            }
            if rest.starts_with('>') {
                self.pos += 1;
                let children = self.read_content(Some(&tag))?;
                return Ok(Element {
                    tag,
                    attributes,
                    children,
                    position,
                });
            }
            if rest.is_empty() {
                return Err(self.error(format!("unclosed tag <{}>", tag)));
            }
            attributes.push(self.read_attribute()?);
        }
    }

    fn read_attribute(&mut self) -> SceneResult<(String, String)> {
        let name = self.read_name()?.to_string();
        self.skip_whitespace();
        self.expect("=")?;
        self.skip_whitespace();
        let quote = match self.peek() {
            Some(quote @ ('"' | '\'')) => quote,
            _ => return Err(self.error(format!("attribute '{}' is not quoted", name))),
        };
        self.pos += 1;
        let rest = self.rest();
        let Some(len) = rest.find(quote) else {
            return Err(self.error(format!("unterminated value of attribute '{}'", name)));
        };
        let value = decode_entities(&rest[..len]);
        self.pos += len + 1;
        Ok((name, value))
    }
}

/// Decode the predefined XML entities and numeric character references;
/// anything else is kept verbatim
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            }?;
            Some((c, end + 1))
        });
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_and_self_closing() {
        let elements = parse_markup(
            "<Transform id='n1' translation=\"1 2 3\"><Shape><Box size='1 1 1'/></Shape></Transform>",
        )
        .unwrap();
        assert_eq!(elements.len(), 1);
        let transform = &elements[0];
        assert_eq!(transform.attribute("id"), Some("n1"));
        assert_eq!(transform.attribute("translation"), Some("1 2 3"));
        assert_eq!(transform.children[0].children[0].tag, "Box");
    }

    #[test]
    fn test_skips_comments_and_declarations() {
        let elements = parse_markup(
            "<?xml version=\"1.0\"?><!DOCTYPE X3D><!-- a <fake> tag --><Group/>text<Group/>",
        )
        .unwrap();
        assert_eq!(elements.len(), 2);
        assert!(elements.iter().all(|element| element.tag == "Group"));
    }

    #[test]
    fn test_entities_decoded() {
        let elements = parse_markup("<WorldInfo title='a &lt;b&gt; &amp; &quot;c&quot; &#65;&#x42;'/>").unwrap();
        assert_eq!(elements[0].attribute("title"), Some("a <b> & \"c\" AB"));
        assert_eq!(decode_entities("R&D &bogus;"), "R&D &bogus;");
    }

    #[test]
    fn test_malformed_markup() {
        assert!(matches!(
            parse_markup("<Group><Shape></Group>"),
            Err(SceneError::MalformedMarkup { .. })
        ));
        assert!(parse_markup("<Group>").is_err());
        assert!(parse_markup("<Group id=n1/>").is_err());
        assert!(parse_markup("<Group id='n1/>").is_err());
        assert!(parse_markup("</Group>").is_err());
        assert!(parse_markup("<!-- never closed").is_err());
    }
}
