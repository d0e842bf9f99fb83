//! Repeating-group structure: for each parent ("NoXXX") tag, the ordered
//! list of tags that belong to one group instance. The first tag in the
//! list is the delimiter the codec uses to recognize a new entry.

use super::Tags;
use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref GROUPS: HashMap<u32, Vec<u32>> = {
        let mut m = HashMap::new();
        m.insert(
            Tags::NoMsgTypes as u32,
            vec![Tags::RefMsgType as u32, Tags::MsgDirection as u32],
        );
        m
    };
}

/// The member tags of one entry of the repeating group starting at
/// `count_tag`, in wire order, or `None` if `count_tag` does not start a
/// known group.
pub fn group_members(count_tag: u32) -> Option<&'static [u32]> {
    GROUPS.get(&count_tag).map(|tags| tags.as_slice())
}

pub fn is_group_tag(count_tag: u32) -> bool {
    GROUPS.contains_key(&count_tag)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_msg_types_group_is_known() {
        let members = group_members(Tags::NoMsgTypes as u32).unwrap();
        assert_eq!(members, &[Tags::RefMsgType as u32, Tags::MsgDirection as u32]);
    }

    #[test]
    fn unknown_tag_is_not_a_group() {
        assert!(group_members(Tags::Account as u32).is_none());
        assert!(!is_group_tag(Tags::Account as u32));
    }
}
