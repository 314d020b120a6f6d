pub mod producer;


pub use producer::KafkaSink;
