pub mod selenium;

pub use selenium::{Element, WebDriver};
