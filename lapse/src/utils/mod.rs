pub mod duration_parser;
