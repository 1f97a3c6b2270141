//! Readback format adapter
//!
//! Turns a render target read into a frame the sink accepts: strips row
//! padding, converts channel order in the same pass and flips bottom-up
//! reads so rows run top to bottom.

use crate::gpu::{BackendError, ReadbackImage, RowOrder};
use crate::video::{convert_row, Frame, PixelLayout};

/// Convert a readback image to a top-down frame in `sink_layout`
pub fn adapt_readback(image: &ReadbackImage, sink_layout: PixelLayout) -> Result<Frame, BackendError> {
    let width = image.width as usize;
    let height = image.height as usize;
    let row_bytes = width * image.layout.channels();

    if image.stride < row_bytes {
        return Err(BackendError::Readback(format!(
            "row stride {} is shorter than a {}-pixel row",
            image.stride, width
        )));
    }
    let needed = if height == 0 { 0 } else { image.stride * (height - 1) + row_bytes };
    if image.data.len() < needed {
        return Err(BackendError::Readback(format!(
            "readback holds {} bytes, {}x{} needs {}",
            image.data.len(),
            width,
            height,
            needed
        )));
    }

    let mut data = Vec::with_capacity(Frame::expected_size(image.width, image.height, sink_layout));
    for row in 0..height {
        let src_row = match image.row_order {
            RowOrder::TopDown => row,
            RowOrder::BottomUp => height - 1 - row,
        };
        let start = src_row * image.stride;
        convert_row(&image.data[start..start + row_bytes], image.layout, sink_layout, &mut data);
    }

    Ok(Frame::new(data, image.width, image.height, sink_layout, 0))
}
