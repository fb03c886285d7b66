mod integrity;
mod ledger;
mod loan;
mod movement;

pub use integrity::*;
pub use ledger::*;
pub use loan::*;
pub use movement::*;
