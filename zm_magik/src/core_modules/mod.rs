// THEORY:
// `core_modules` holds the image-processing building blocks. Leaves first:
// frame access and the spatial primitives (`frame_source`, `polygon_mask`,
// `detection`, `draw`), then the detection layer (`blob_detector`,
// `background_model`, `detector`), the `intensity_balancer`, and finally the three
// engines (`template_search`, `blend_compositor`, `annotation_overlay`).

pub mod annotation_overlay;
pub mod background_model;
pub mod blend_compositor;
pub mod blob_detector;
pub mod detection;
pub mod detector;
pub mod draw;
pub mod frame_source;
pub mod intensity_balancer;
pub mod object_model;
pub mod polygon_mask;
pub mod template_search;
