/*!
# Symbion DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement du plugin Graphite avec:
- Faux serveur Carbon (protocoles ligne et pickle)
- Constructeurs de broks de supervision
- Harness de test avec expectations
*/

pub mod brok_helpers;
pub mod carbon_stub;
pub mod test_utils;

pub use brok_helpers::{BrokBuilder, BROK_TOPIC};
pub use carbon_stub::{decode_pickle_batch, FakeCarbon, PicklePoint};
pub use test_utils::TestHarness;
