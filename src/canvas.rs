//! Relocates decoded frames into the 16:9 target frame.
//!
//! Frames are first normalized to planar YUV 4:2:0 at source size, then the
//! [`TransformPlan`] is applied by copying rows between planes. Offsets from
//! the planner are even, so chroma planes shift by exactly half.

use ffmpeg::{
    format::Pixel,
    software::scaling::{self, Flags},
    util::frame::Video,
};

use crate::geometry::{Plan, TransformPlan};

pub const PIXEL_FORMAT: Pixel = Pixel::YUV420P;

/// A rectangle copy between two planes of one frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Blit {
    src_x: usize,
    src_y: usize,
    dst_x: usize,
    dst_y: usize,
    width: usize,
    height: usize,
}

impl Blit {
    /// Geometry of plane `plane` given luma-plane geometry.
    fn for_plane(self, plane: usize) -> Self {
        if plane == 0 {
            return self;
        }
        Self {
            src_x: self.src_x / 2,
            src_y: self.src_y / 2,
            dst_x: self.dst_x / 2,
            dst_y: self.dst_y / 2,
            width: self.width.div_ceil(2),
            height: self.height.div_ceil(2),
        }
    }
}

fn copy_rect(src: &[u8], src_stride: usize, dst: &mut [u8], dst_stride: usize, blit: Blit) {
    for row in 0..blit.height {
        let from = (blit.src_y + row) * src_stride + blit.src_x;
        let to = (blit.dst_y + row) * dst_stride + blit.dst_x;
        dst[to..to + blit.width].copy_from_slice(&src[from..from + blit.width]);
    }
}

/// Luma-plane copy for `plan` and the YUV fill for padding bars, if any.
fn layout(plan: &Plan) -> (Blit, Option<[u8; 3]>) {
    let whole_source = |dst_x: u32, dst_y: u32| Blit {
        src_x: 0,
        src_y: 0,
        dst_x: dst_x as usize,
        dst_y: dst_y as usize,
        width: plan.source_width as usize,
        height: plan.source_height as usize,
    };
    match plan.transform {
        None => (whole_source(0, 0), None),
        Some(TransformPlan::Crop {
            x_offset,
            y_offset,
            width,
            height,
        }) => {
            let blit = Blit {
                src_x: x_offset as usize,
                src_y: y_offset as usize,
                dst_x: 0,
                dst_y: 0,
                width: width as usize,
                height: height as usize,
            };
            (blit, None)
        }
        Some(TransformPlan::Pad {
            top, left, fill_color, ..
        }) => (whole_source(left, top), Some(fill_color.to_yuv())),
    }
}

/// Applies one [`Plan`] to every frame of a stream.
pub struct FrameCanvas {
    plan: Plan,
    scaler: Option<Scaler>,
}

struct Scaler {
    format: Pixel,
    width: u32,
    height: u32,
    context: scaling::Context,
    frame: Video,
}

impl FrameCanvas {
    pub fn new(plan: Plan) -> Self {
        Self { plan, scaler: None }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Produces a fresh target-sized frame from `decoded`.
    pub fn apply(&mut self, decoded: &Video) -> Result<Video, ffmpeg::Error> {
        let plan = self.plan;
        let (blit, fill) = layout(&plan);
        let normalized = self.normalize(decoded)?;
        let mut output = Video::new(PIXEL_FORMAT, plan.target.width(), plan.target.height());

        for plane in 0..output.planes() {
            if let Some(fill) = fill {
                output.data_mut(plane).fill(fill[plane]);
            }
            let src_stride = normalized.stride(plane);
            let dst_stride = output.stride(plane);
            copy_rect(
                normalized.data(plane),
                src_stride,
                output.data_mut(plane),
                dst_stride,
                blit.for_plane(plane),
            );
        }
        Ok(output)
    }

    /// Returns `decoded` as YUV 4:2:0 at the probed source size, converting
    /// through swscale when the decoder emits anything else.
    fn normalize<'a>(&'a mut self, decoded: &'a Video) -> Result<&'a Video, ffmpeg::Error> {
        let (width, height) = (self.plan.source_width, self.plan.source_height);
        if decoded.format() == PIXEL_FORMAT
            && decoded.width() == width
            && decoded.height() == height
        {
            return Ok(decoded);
        }

        let stale = self.scaler.as_ref().map_or(true, |scaler| {
            (scaler.format, scaler.width, scaler.height)
                != (decoded.format(), decoded.width(), decoded.height())
        });
        if stale {
            let context = scaling::Context::get(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                PIXEL_FORMAT,
                width,
                height,
                Flags::BILINEAR,
            )?;
            self.scaler = Some(Scaler {
                format: decoded.format(),
                width: decoded.width(),
                height: decoded.height(),
                context,
                frame: Video::empty(),
            });
        }

        let scaler = self.scaler.as_mut().ok_or(ffmpeg::Error::Bug)?;
        scaler.context.run(decoded, &mut scaler.frame)?;
        Ok(&scaler.frame)
    }
}
