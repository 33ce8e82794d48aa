use crate::binxml::assemble::resolve_entity;
use crate::binxml::name::BinXmlName;
use crate::binxml::value::BinXmlValue;
use crate::err::{SerializationError, SerializationResult};
use crate::model::XmlElement;
use crate::xml_output::BinXmlOutput;
use crate::ParserSettings;

use log::trace;
use serde_json::{Map, Value};

/// Builds an ordered `serde_json::Value` from a record's element stream.
///
/// Conventions:
/// - attributes land under `#attributes` (or as a `<name>_attributes`
///   sibling when `separate_json_attributes` is set);
/// - text content lands under `#text` when the element also carries
///   attributes, or replaces the element's value otherwise;
/// - `<Data Name="X">v</Data>` inside EventData is promoted to `"X": v`;
/// - repeated sibling names collapse into a JSON array, in order.
pub struct JsonOutput {
    map: Value,
    stack: Vec<String>,
    separate_json_attributes: bool,
}

fn structure_error(message: impl Into<String>) -> SerializationError {
    SerializationError::JsonStructureError {
        message: message.into(),
    }
}

impl JsonOutput {
    pub fn new(settings: &ParserSettings) -> Self {
        JsonOutput {
            map: Value::Object(Map::new()),
            stack: Vec::new(),
            separate_json_attributes: settings.should_separate_json_attributes(),
        }
    }

    pub fn into_value(self) -> SerializationResult<Value> {
        if !self.stack.is_empty() {
            return Err(structure_error(
                "invalid stream, EOF reached before closing all elements",
            ));
        }
        Ok(self.map)
    }

    /// Walks `keys` down from the root. At every step a duplicate-name
    /// array resolves to its most recent (in-progress) element.
    fn node_at<'v>(map: &'v mut Value, keys: &[String]) -> SerializationResult<&'v mut Value> {
        let mut current = map;

        for key in keys {
            // A parent created as an empty leaf grows into an object once
            // it has children.
            if current.is_null() {
                *current = Value::Object(Map::new());
            } else if current.is_string() {
                // Mixed content: keep the text under #text.
                let text = current.take();
                let mut object = Map::new();
                object.insert("#text".to_string(), text);
                *current = Value::Object(object);
            }

            let container = match current {
                Value::Array(items) => items
                    .last_mut()
                    .ok_or_else(|| structure_error("empty duplicate-name array"))?,
                other => other,
            };

            if container.is_null() {
                *container = Value::Object(Map::new());
            }

            current = container
                .as_object_mut()
                .ok_or_else(|| {
                    structure_error("expected the parent container to be an object")
                })?
                .get_mut(key)
                .ok_or_else(|| structure_error(format!("missing container for key `{key}`")))?;
        }

        // The final step may itself be a duplicate-name array.
        Ok(match current {
            Value::Array(items) => items
                .last_mut()
                .ok_or_else(|| structure_error("empty duplicate-name array"))?,
            other => other,
        })
    }

    /// Inserts `key` under the current parent, converting a duplicate
    /// sibling into an array.
    fn insert_child(&mut self, key: &str) -> SerializationResult<()> {
        let parent = Self::node_at(&mut self.map, &self.stack)?;

        if parent.is_null() {
            *parent = Value::Object(Map::new());
        }
        let object = parent
            .as_object_mut()
            .ok_or_else(|| structure_error("expected the parent container to be an object"))?;

        match object.get_mut(key) {
            None => {
                object.insert(key.to_string(), Value::Null);
            }
            Some(Value::Array(items)) => items.push(Value::Null),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::Null]);
            }
        }

        self.stack.push(key.to_string());
        Ok(())
    }

    fn insert_attributes(&mut self, key: &str, element: &XmlElement<'_>) -> SerializationResult<()> {
        let mut attributes = Map::with_capacity(element.attributes.len());
        for attribute in &element.attributes {
            let value = Value::from(&attribute.value);
            if !value.is_null() {
                attributes.insert(attribute.name.as_str().to_string(), value);
            }
        }

        if attributes.is_empty() {
            return Ok(());
        }

        if self.separate_json_attributes {
            // The attributes become a sibling of the element itself.
            let parent_keys = &self.stack[..self.stack.len() - 1];
            let parent = Self::node_at(&mut self.map, parent_keys)?;
            parent
                .as_object_mut()
                .ok_or_else(|| structure_error("expected the parent container to be an object"))?
                .insert(format!("{key}_attributes"), Value::Object(attributes));
        } else {
            let node = Self::node_at(&mut self.map, &self.stack)?;
            let mut object = Map::with_capacity(1);
            object.insert("#attributes".to_string(), Value::Object(attributes));
            *node = Value::Object(object);
        }

        Ok(())
    }
}

impl BinXmlOutput for JsonOutput {
    fn visit_start_of_stream(&mut self) -> SerializationResult<()> {
        trace!("visit_start_of_stream");
        Ok(())
    }

    fn visit_open_start_element(&mut self, element: &XmlElement<'_>) -> SerializationResult<()> {
        trace!("visit_open_start_element: {:?}", element.name);
        let element_name = element.name.as_str();

        // `<Data Name="key">value</Data>` is keyed by its Name attribute.
        if element_name == "Data" {
            if let Some(name_attribute) = element
                .attributes
                .iter()
                .find(|attribute| attribute.name.as_str() == "Name")
            {
                let key = name_attribute.value.as_cow_str().into_owned();
                return self.insert_child(&key);
            }
        }

        self.insert_child(element_name)?;
        self.insert_attributes(element_name, element)
    }

    fn visit_close_element(&mut self) -> SerializationResult<()> {
        let popped = self.stack.pop();
        trace!("visit_close_element: {popped:?}");
        if popped.is_none() {
            return Err(structure_error("close element without an open element"));
        }
        Ok(())
    }

    fn visit_characters(&mut self, value: &BinXmlValue<'_>) -> SerializationResult<()> {
        trace!("visit_characters at {:?}", self.stack);
        let node = Self::node_at(&mut self.map, &self.stack)?;

        match node {
            Value::Null => *node = Value::from(value),
            Value::Object(object) => match object.get_mut("#text") {
                None | Some(Value::Null) => {
                    object.insert("#text".to_string(), Value::from(value));
                }
                Some(Value::String(existing)) => existing.push_str(&value.as_cow_str()),
                Some(Value::Array(items)) => items.push(Value::from(value)),
                Some(other) => {
                    return Err(structure_error(format!(
                        "expected #text to be a string or an array, found {other:?}"
                    )));
                }
            },
            Value::String(existing) => existing.push_str(&value.as_cow_str()),
            Value::Array(items) => items.push(Value::from(value)),
            other => {
                return Err(structure_error(format!(
                    "expected the current node to accept text, found {other:?}"
                )));
            }
        }

        Ok(())
    }

    fn visit_entity_reference(&mut self, name: &BinXmlName) -> SerializationResult<()> {
        let resolved = resolve_entity(name).into_owned();
        self.visit_characters(&BinXmlValue::String(resolved))
    }

    fn visit_end_of_stream(&mut self) -> SerializationResult<()> {
        trace!("visit_end_of_stream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::XmlAttribute;
    use pretty_assertions::assert_eq;
    use quick_xml::events::Event;
    use quick_xml::Reader;
    use std::rc::Rc;

    fn event_to_element(event: quick_xml::events::BytesStart) -> XmlElement<'static> {
        let mut attributes = Vec::new();

        for attribute in event.attributes() {
            let attribute = attribute.expect("failed to read attribute");
            attributes.push(XmlAttribute {
                name: Rc::new(BinXmlName::from_str(
                    std::str::from_utf8(attribute.key.as_ref()).expect("utf8 input"),
                )),
                value: BinXmlValue::String(
                    String::from_utf8(attribute.value.to_vec()).expect("utf8 input"),
                ),
            });
        }

        XmlElement {
            name: Rc::new(BinXmlName::from_str(
                std::str::from_utf8(event.name().as_ref()).expect("utf8 input"),
            )),
            attributes,
        }
    }

    /// Drives a `JsonOutput` from XML text, panicking if the XML is invalid.
    fn xml_to_json(xml: &str, settings: &ParserSettings) -> Value {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut output = JsonOutput::new(settings);
        output.visit_start_of_stream().expect("start of stream");

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    output
                        .visit_open_start_element(&event_to_element(start))
                        .expect("open element");
                }
                Ok(Event::End(_)) => output.visit_close_element().expect("close element"),
                Ok(Event::Empty(empty)) => {
                    output
                        .visit_open_start_element(&event_to_element(empty))
                        .expect("open empty element");
                    output.visit_close_element().expect("close empty element");
                }
                Ok(Event::Text(text)) => output
                    .visit_characters(&BinXmlValue::String(
                        text.unescape().expect("decoded text").into_owned(),
                    ))
                    .expect("text"),
                Ok(Event::Eof) => {
                    output.visit_end_of_stream().expect("end of stream");
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("xml error: {e:?}"),
            }
        }

        output.into_value().expect("a complete document")
    }

    #[test]
    fn test_simple_nodes_and_attributes() {
        let xml = r#"<Event><EventID Qualifiers="16384">4902</EventID><Task>12288</Task></Event>"#;
        let json = xml_to_json(xml, &ParserSettings::new());

        assert_eq!(
            json,
            serde_json::json!({
                "Event": {
                    "EventID": {
                        "#attributes": { "Qualifiers": "16384" },
                        "#text": "4902"
                    },
                    "Task": "12288"
                }
            })
        );
    }

    #[test]
    fn test_data_name_promotion() {
        let xml = r#"<EventData><Data Name="TargetUserName">SYSTEM</Data></EventData>"#;
        let json = xml_to_json(xml, &ParserSettings::new());

        assert_eq!(
            json,
            serde_json::json!({ "EventData": { "TargetUserName": "SYSTEM" } })
        );
    }

    #[test]
    fn test_duplicate_siblings_become_an_array() {
        let xml = "<Headers><Header>a</Header><Header>b</Header><Header>c</Header></Headers>";
        let json = xml_to_json(xml, &ParserSettings::new());

        assert_eq!(
            json,
            serde_json::json!({ "Headers": { "Header": ["a", "b", "c"] } })
        );
    }

    #[test]
    fn test_separate_json_attributes() {
        let xml = r#"<Provider Name="Security" Guid="{1234}"></Provider>"#;
        let settings = ParserSettings::new().separate_json_attributes(true);
        let json = xml_to_json(xml, &settings);

        assert_eq!(
            json,
            serde_json::json!({
                "Provider": null,
                "Provider_attributes": { "Name": "Security", "Guid": "{1234}" }
            })
        );
    }
}
