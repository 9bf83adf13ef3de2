//! Parsing of node-description messages into scene subtrees

pub mod markup;
pub mod nodes;
pub mod values;

pub use markup::{parse_markup, Element};
pub use nodes::{NodeDescriptionParser, ParsedMessage};
