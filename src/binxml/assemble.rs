use crate::binxml::model::BinXmlToken;
use crate::binxml::name::BinXmlName;
use crate::binxml::value::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};
use crate::model::XmlElementBuilder;
use crate::xml_output::BinXmlOutput;

use log::warn;
use std::borrow::Cow;
use std::rc::Rc;

/// A token after template expansion: either a structural token from the
/// original stream (or a template skeleton), or a substitution value
/// spliced in from an instance's value array.
enum ExpandedToken<'t, 'a> {
    Token(&'t BinXmlToken<'a>),
    Value(&'t BinXmlValue<'a>),
}

/// Expands all template instances in `tokens` and drives `visitor` over
/// the resulting element stream.
pub fn parse_tokens<'a, T: BinXmlOutput>(
    tokens: &[BinXmlToken<'a>],
    visitor: &mut T,
) -> SerializationResult<()> {
    let mut expanded = Vec::with_capacity(tokens.len());
    for token in tokens {
        expand_token(token, &mut expanded);
    }

    visitor.visit_start_of_stream()?;

    let mut builder: Option<XmlElementBuilder<'a>> = None;

    for item in expanded {
        match item {
            ExpandedToken::Token(BinXmlToken::FragmentHeader(_)) => {}
            // Fragment boundaries are handled once, below.
            ExpandedToken::Token(BinXmlToken::EndOfStream) => {}

            ExpandedToken::Token(BinXmlToken::OpenStartElement(elem)) => {
                if builder.is_some() {
                    return Err(SerializationError::RecordStructureError {
                        message: "open element while attribute list is still open",
                    });
                }
                builder = Some(XmlElementBuilder::new(Rc::clone(&elem.name)));
            }
            ExpandedToken::Token(BinXmlToken::Attribute(attr)) => match builder.as_mut() {
                Some(builder) => builder.attribute_name(Rc::clone(&attr.name)),
                None => {
                    return Err(SerializationError::RecordStructureError {
                        message: "attribute token outside an element start",
                    });
                }
            },
            ExpandedToken::Token(BinXmlToken::CloseStartElement) => {
                let element = builder
                    .take()
                    .ok_or(SerializationError::RecordStructureError {
                        message: "close-start token without an open element",
                    })?
                    .finish()?;
                visitor.visit_open_start_element(&element)?;
            }
            ExpandedToken::Token(BinXmlToken::CloseEmptyElement) => {
                let element = builder
                    .take()
                    .ok_or(SerializationError::RecordStructureError {
                        message: "empty-element token without an open element",
                    })?
                    .finish()?;
                visitor.visit_open_start_element(&element)?;
                visitor.visit_close_element()?;
            }
            ExpandedToken::Token(BinXmlToken::CloseElement) => {
                visitor.visit_close_element()?;
            }
            ExpandedToken::Token(BinXmlToken::EntityRef(entity)) => match builder.as_mut() {
                Some(element) if element.expecting_value() => {
                    let resolved = resolve_entity(&entity.name);
                    element.attribute_value(BinXmlValue::String(resolved.into_owned()))?;
                }
                _ => visitor.visit_entity_reference(&entity.name)?,
            },

            // These are consumed by expansion and cannot appear here.
            ExpandedToken::Token(BinXmlToken::TemplateInstance(_))
            | ExpandedToken::Token(BinXmlToken::Value(_))
            | ExpandedToken::Token(BinXmlToken::Substitution(_)) => {
                return Err(SerializationError::RecordStructureError {
                    message: "unexpanded token after template expansion",
                });
            }

            ExpandedToken::Value(value) => match builder.as_mut() {
                Some(element) if element.expecting_value() => {
                    element.attribute_value(value.clone())?;
                }
                Some(_) => {
                    // A value inside an attribute list with no pending
                    // name; windows drops these.
                }
                None => visitor.visit_characters(value)?,
            },
        }
    }

    if builder.is_some() {
        return Err(SerializationError::RecordStructureError {
            message: "record ended inside an element start",
        });
    }

    visitor.visit_end_of_stream()?;
    Ok(())
}

fn expand_token<'t, 'a>(token: &'t BinXmlToken<'a>, out: &mut Vec<ExpandedToken<'t, 'a>>) {
    match token {
        BinXmlToken::TemplateInstance(instance) => {
            for token in &instance.definition.tokens {
                if let BinXmlToken::Substitution(descriptor) = token {
                    match instance
                        .substitutions
                        .get(usize::from(descriptor.substitution_index))
                    {
                        None => warn!(
                            "template {} has no value for substitution slot {}",
                            instance.definition.guid, descriptor.substitution_index
                        ),
                        Some(BinXmlValue::Null) if descriptor.optional => {}
                        Some(value) => expand_value(value, out),
                    }
                } else {
                    expand_token(token, out);
                }
            }
        }
        BinXmlToken::Value(value) => expand_value(value, out),
        other => out.push(ExpandedToken::Token(other)),
    }
}

fn expand_value<'t, 'a>(value: &'t BinXmlValue<'a>, out: &mut Vec<ExpandedToken<'t, 'a>>) {
    if let BinXmlValue::BinXml(tokens) = value {
        for token in tokens {
            expand_token(token, out);
        }
    } else {
        out.push(ExpandedToken::Value(value));
    }
}

/// Resolves the XML 1.0 built-in entities; anything else is kept in its
/// `&name;` source form.
pub(crate) fn resolve_entity(name: &BinXmlName) -> Cow<'static, str> {
    match name.as_str() {
        "amp" => Cow::Borrowed("&"),
        "lt" => Cow::Borrowed("<"),
        "gt" => Cow::Borrowed(">"),
        "quot" => Cow::Borrowed("\""),
        "apos" => Cow::Borrowed("'"),
        other => Cow::Owned(format!("&{other};")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::model::{BinXmlAttribute, BinXmlOpenStartElement};
    use crate::tree_output::{TreeOutput, XmlContent};
    use pretty_assertions::assert_eq;

    fn open(name: &str, has_attributes: bool) -> BinXmlToken<'static> {
        BinXmlToken::OpenStartElement(BinXmlOpenStartElement {
            data_size: 0,
            name: Rc::new(BinXmlName::from_str(name)),
            has_attributes,
        })
    }

    #[test]
    fn test_assembles_a_simple_tree() {
        let tokens = vec![
            open("Event", true),
            BinXmlToken::Attribute(BinXmlAttribute {
                name: Rc::new(BinXmlName::from_str("xmlns")),
            }),
            BinXmlToken::Value(BinXmlValue::String("urn:test".to_string())),
            BinXmlToken::CloseStartElement,
            open("EventID", false),
            BinXmlToken::CloseStartElement,
            BinXmlToken::Value(BinXmlValue::UInt16(4624)),
            BinXmlToken::CloseElement,
            BinXmlToken::CloseElement,
            BinXmlToken::EndOfStream,
        ];

        let mut output = TreeOutput::new();
        parse_tokens(&tokens, &mut output).unwrap();
        let tree = output.into_tree().unwrap();

        let XmlContent::Element(event) = &tree.roots[0] else {
            panic!("expected an element root");
        };
        assert_eq!(event.name, "Event");
        assert_eq!(
            event.attributes,
            vec![("xmlns".to_string(), "urn:test".to_string())]
        );

        let XmlContent::Element(event_id) = &event.children[0] else {
            panic!("expected a child element");
        };
        assert_eq!(event_id.name, "EventID");
        assert_eq!(event_id.children, vec![XmlContent::Text("4624".to_string())]);
    }

    #[test]
    fn test_unbalanced_stream_is_rejected() {
        let tokens = vec![open("Event", false), BinXmlToken::EndOfStream];

        let mut output = TreeOutput::new();
        assert!(parse_tokens(&tokens, &mut output).is_err());
    }
}
