//! Strategy layer: the two trading bots built on top of the exchange
//! adapter layer and the shared lifecycle/reconcile/tp-ladder machinery.

pub mod grid;
pub mod hedge;
