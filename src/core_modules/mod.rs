pub mod augmentation;
pub mod bounding_box;
pub mod file_name;
pub mod foreground_object;
pub mod frame_source;
pub mod mask;
pub mod mask_decomposer;
pub mod representative_image;
pub mod representative_pool;
pub mod rotation;
pub mod rotation_sweep;
pub mod substitution;
pub mod utils;
pub mod yolo_label;
