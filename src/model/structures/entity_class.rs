use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::EnumIter;

/// Category of rated entity. Users and maps compete against each other but
/// are ranked on separate leaderboards.
#[derive(
    Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter,
)]
#[repr(u8)]
pub enum EntityClass {
    User = 0,
    Map = 1
}

impl TryFrom<i32> for EntityClass {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(EntityClass::User),
            1 => Ok(EntityClass::Map),
            _ => Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::structures::entity_class::EntityClass;
    use strum::IntoEnumIterator;

    #[test]
    fn test_convert_user() {
        assert_eq!(EntityClass::try_from(0), Ok(EntityClass::User));
    }

    #[test]
    fn test_convert_map() {
        assert_eq!(EntityClass::try_from(1), Ok(EntityClass::Map));
    }

    #[test]
    fn test_convert_invalid() {
        assert_eq!(EntityClass::try_from(2), Err(()));
    }

    #[test]
    fn test_enumerate() {
        let classes = EntityClass::iter().collect::<Vec<_>>();
        assert_eq!(classes, vec![EntityClass::User, EntityClass::Map]);
    }
}
