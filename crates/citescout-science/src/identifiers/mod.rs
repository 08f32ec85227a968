pub mod doi;
