mod category;
mod classify;
mod cluster;
mod mention;
mod semantic;
mod sentiment;
mod spam;
mod validity;

pub use category::CategoryAssign;
pub use classify::Classify;
pub use cluster::ClusterAssign;
pub use mention::RecordMention;
pub use semantic::SemanticAnalysis;
pub use sentiment::SentimentAnalysis;
pub use spam::SpamCheck;
pub use validity::ValidityCheck;

use crate::stage::Stage;

/// The stages run after the early-termination checkpoint. A derived problem
/// traverses the same chain.
pub fn downstream_chain() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(Classify),
        Box::new(SemanticAnalysis),
        Box::new(SentimentAnalysis),
        Box::new(CategoryAssign),
        Box::new(ClusterAssign),
        Box::new(RecordMention),
    ]
}
