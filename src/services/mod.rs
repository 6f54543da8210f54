pub mod box_refiner;
pub mod camera;
pub mod color;
pub mod config;
pub mod coordinate_mapper;
pub mod detection_client;
pub mod frame_source;
pub mod geometry;
pub mod local_detector;
pub mod ocr;
pub mod scanner;
