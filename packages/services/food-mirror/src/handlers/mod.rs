pub mod product_lookup;
pub mod recent_pages;

pub use product_lookup::*;
pub use recent_pages::*;
