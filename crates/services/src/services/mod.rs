pub mod collection;
pub mod config;
pub mod integrity;
pub mod normalize;
pub mod ordering;
pub mod record_editor;
pub mod relationship_sync;
pub mod side_effects;

#[cfg(test)]
pub(crate) mod test_support;
