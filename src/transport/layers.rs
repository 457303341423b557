mod enrich;
pub use enrich::{HeaderEnricherLayer, HeaderEnricherService};
