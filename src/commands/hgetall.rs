use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns all fields and values of the hash stored at `key` as a flat array of alternating
/// fields and values. The order of the pairs is unspecified.
///
/// Unlike Redis, a missing hash replies `nil` instead of an empty array.
///
/// Ref: <https://redis.io/docs/latest/commands/hgetall/>
#[derive(Debug, PartialEq)]
pub struct Hgetall {
    pub key: String,
}

impl Executable for Hgetall {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let pairs = match store.hgetall(&self.key) {
            Some(pairs) => pairs,
            None => return Ok(Frame::Null),
        };

        let frames = pairs
            .into_iter()
            .flat_map(|(field, value)| [Frame::Bulk(field.into()), Frame::Bulk(value)])
            .collect();

        Ok(Frame::Array(frames))
    }
}

impl TryFrom<&mut CommandParser> for Hgetall {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        parser.expect_arity("hgetall", 1)?;

        let key = parser.next_string()?;
        Ok(Self { key })
    }
}
