//! A generic, ordered FIX message container.
//!
//! The session and codec layers work directly with the wire bytes and a
//! handful of parsed header fields (see [`decode`]); this module exists for
//! code that wants to build or inspect a whole message as one value — order
//! entry request builders, application-level tests, and anything that walks
//! repeating groups. Field order is preserved because two messages with the
//! same tags in a different order are not considered equal on the wire.
//!
//! [`decode`]: crate::fix::decode

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("tag {0} not found")]
    NotFound(u32),
    #[error("tag {0} already set")]
    Duplicated(u32),
    #[error("tag {0} was repeated outside of any known group; reading it is ambiguous")]
    RepeatingAmbiguous(u32),
    #[error("tag {0} does not belong to a repeating group")]
    Unmapped(u32),
}

#[derive(Debug, Clone, PartialEq)]
enum Field {
    Scalar(String),
    Group(Vec<Message>),
    Ambiguous,
}

/// One field as seen by [`Message::wire_fields`]: either a scalar value or
/// an already-ordered repeating group.
#[derive(Debug, Clone, Copy)]
pub enum WireField<'a> {
    Scalar(&'a str),
    Group(&'a [Message]),
}

/// An insertion-ordered tag -> value mapping, with support for nested
/// repeating groups. A bare `Message` (no `msg_type`) is also used as the
/// shape of one repeating-group entry.
#[derive(Debug, Clone)]
pub struct Message {
    msg_type: Option<char>,
    fields: IndexMap<u32, Field>,
}

impl Message {
    pub fn new(msg_type: char) -> Self {
        Message {
            msg_type: Some(msg_type),
            fields: IndexMap::new(),
        }
    }

    /// Constructs a bare container, as used for one entry of a repeating group.
    pub fn new_group_entry() -> Self {
        Message {
            msg_type: None,
            fields: IndexMap::new(),
        }
    }

    pub fn msg_type(&self) -> Option<char> {
        self.msg_type
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.fields.contains_key(&tag)
    }

    /// Sets a scalar value. Returns [`MessageError::Duplicated`] if the tag is
    /// already set; use [`Message::replace`] to overwrite deliberately.
    pub fn set(&mut self, tag: u32, value: impl Into<String>) -> Result<(), MessageError> {
        if self.fields.contains_key(&tag) {
            return Err(MessageError::Duplicated(tag));
        }
        self.fields.insert(tag, Field::Scalar(value.into()));
        Ok(())
    }

    pub fn replace(&mut self, tag: u32, value: impl Into<String>) {
        self.fields.insert(tag, Field::Scalar(value.into()));
    }

    pub fn get(&self, tag: u32) -> Result<&str, MessageError> {
        match self.fields.get(&tag) {
            Some(Field::Scalar(v)) => Ok(v.as_str()),
            Some(Field::Group(_)) => Err(MessageError::Unmapped(tag)),
            Some(Field::Ambiguous) => Err(MessageError::RepeatingAmbiguous(tag)),
            None => Err(MessageError::NotFound(tag)),
        }
    }

    pub fn remove(&mut self, tag: u32) {
        self.fields.shift_remove(&tag);
    }

    /// Marks `tag` as having appeared more than once outside of any known
    /// repeating group. A subsequent [`Message::get`] of this tag fails with
    /// [`MessageError::RepeatingAmbiguous`] rather than silently keeping the
    /// last value seen, since the decoder cannot tell which occurrence the
    /// sender meant.
    pub fn mark_ambiguous(&mut self, tag: u32) {
        self.fields.insert(tag, Field::Ambiguous);
    }

    /// Appends one entry to the repeating group under `tag`, creating the
    /// group if this is the first entry.
    pub fn add_group(&mut self, tag: u32, entry: Message) -> Result<(), MessageError> {
        match self.fields.get_mut(&tag) {
            Some(Field::Group(entries)) => {
                entries.push(entry);
                Ok(())
            }
            Some(Field::Scalar(_)) | Some(Field::Ambiguous) => Err(MessageError::Duplicated(tag)),
            None => {
                self.fields.insert(tag, Field::Group(vec![entry]));
                Ok(())
            }
        }
    }

    /// Replaces the whole repeating group under `tag`.
    pub fn set_group(&mut self, tag: u32, entries: Vec<Message>) -> Result<(), MessageError> {
        if self.fields.contains_key(&tag) {
            return Err(MessageError::Duplicated(tag));
        }
        self.fields.insert(tag, Field::Group(entries));
        Ok(())
    }

    pub fn get_group_list(&self, tag: u32) -> Result<&[Message], MessageError> {
        match self.fields.get(&tag) {
            Some(Field::Group(entries)) => Ok(entries.as_slice()),
            Some(Field::Scalar(_)) => Err(MessageError::Unmapped(tag)),
            Some(Field::Ambiguous) => Err(MessageError::RepeatingAmbiguous(tag)),
            None => Err(MessageError::NotFound(tag)),
        }
    }

    pub fn get_group_by_index(&self, tag: u32, index: usize) -> Result<&Message, MessageError> {
        let entries = self.get_group_list(tag)?;
        entries.get(index).ok_or(MessageError::NotFound(tag))
    }

    /// Finds the first entry of the group under `tag` whose sub-tag `gtag`
    /// equals `gvalue`.
    pub fn get_group_by_tag(
        &self,
        tag: u32,
        gtag: u32,
        gvalue: &str,
    ) -> Result<&Message, MessageError> {
        let entries = self.get_group_list(tag)?;
        entries
            .iter()
            .find(|e| e.get(gtag).map(|v| v == gvalue).unwrap_or(false))
            .ok_or(MessageError::NotFound(gtag))
    }

    /// A read-only view of this message's fields in wire order, for codecs
    /// that need to walk scalars and groups without reaching into the
    /// private `Field` representation.
    pub fn wire_fields(&self) -> impl Iterator<Item = (u32, WireField<'_>)> {
        self.fields.iter().filter_map(|(tag, field)| match field {
            Field::Scalar(v) => Some((*tag, WireField::Scalar(v.as_str()))),
            Field::Group(entries) => Some((*tag, WireField::Group(entries.as_slice()))),
            Field::Ambiguous => None,
        })
    }

    /// Canonical string form: `tag=value` pairs joined by `|`, in insertion
    /// order, with nested groups rendered the same way. Two messages are
    /// equal iff this form matches, which is also what [`PartialEq`] uses.
    fn canonical(&self) -> String {
        self.fields
            .iter()
            .map(|(tag, field)| match field {
                Field::Scalar(v) => format!("{tag}={v}"),
                Field::Group(entries) => format!(
                    "{tag}=[{}]",
                    entries
                        .iter()
                        .map(|e| e.canonical())
                        .collect::<Vec<_>>()
                        .join(";")
                ),
                Field::Ambiguous => format!("{tag}=#ambiguous#"),
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.msg_type == other.msg_type && self.canonical() == other.canonical()
    }
}
impl Eq for Message {}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(mt) = self.msg_type {
            write!(f, "{mt}:")?;
        }
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_get_roundtrip_preserves_order() {
        let mut msg = Message::new('D');
        msg.set(49, "SENDER").unwrap();
        msg.set(56, "TARGET").unwrap();
        assert_eq!(msg.get(49).unwrap(), "SENDER");
        assert_eq!(msg.get(56).unwrap(), "TARGET");
        assert_eq!(msg.canonical(), "49=SENDER|56=TARGET");
    }

    #[test]
    fn setting_an_existing_tag_twice_is_an_error() {
        let mut msg = Message::new('D');
        msg.set(11, "abc").unwrap();
        assert_eq!(msg.set(11, "xyz"), Err(MessageError::Duplicated(11)));
    }

    #[test]
    fn missing_tag_is_an_error() {
        let msg = Message::new('D');
        assert_eq!(msg.get(11), Err(MessageError::NotFound(11)));
    }

    #[test]
    fn repeating_groups_round_trip() {
        let mut msg = Message::new('D');
        let mut leg1 = Message::new_group_entry();
        leg1.set(54, "1").unwrap();
        let mut leg2 = Message::new_group_entry();
        leg2.set(54, "2").unwrap();
        msg.add_group(555, leg1).unwrap();
        msg.add_group(555, leg2).unwrap();

        assert_eq!(msg.get_group_list(555).unwrap().len(), 2);
        assert_eq!(msg.get_group_by_index(555, 1).unwrap().get(54).unwrap(), "2");
        assert_eq!(
            msg.get_group_by_tag(555, 54, "2").unwrap().get(54).unwrap(),
            "2"
        );
    }

    #[test]
    fn ambiguous_tag_reads_fail() {
        let mut msg = Message::new('D');
        msg.mark_ambiguous(58);
        assert_eq!(msg.get(58), Err(MessageError::RepeatingAmbiguous(58)));
    }

    #[test]
    fn wire_fields_exposes_scalars_and_groups_in_order() {
        let mut msg = Message::new('A');
        msg.set(49, "SENDER").unwrap();
        let mut leg = Message::new_group_entry();
        leg.set(372, "D").unwrap();
        msg.add_group(384, leg).unwrap();

        let fields: Vec<_> = msg.wire_fields().collect();
        assert_eq!(fields.len(), 2);
        assert!(matches!(fields[0], (49, WireField::Scalar("SENDER"))));
        match fields[1] {
            (384, WireField::Group(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].get(372).unwrap(), "D");
            }
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn equality_is_by_canonical_form() {
        let mut a = Message::new('D');
        a.set(1, "x").unwrap();
        let mut b = Message::new('D');
        b.set(1, "x").unwrap();
        assert_eq!(a, b);
    }
}
