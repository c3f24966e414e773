pub mod crew;

pub use crew::{CrewDraft, CrewField, CrewMember, CrewPatch, FieldKind, FieldValue, NewCrewMember};
