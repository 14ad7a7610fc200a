// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenCV-backed source, sink, window and filter.

use std::path::PathBuf;

use opencv::{
    core::{Mat, Point, Size, BORDER_DEFAULT},
    highgui, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{debug, error, info};

use crate::capture::{self, Dimensions, FrameFilter, FrameInfo, Surface};
use crate::config::Target;
use crate::error::{BackendError, Error};
use crate::recording::{self, Naming, RecordingInfo};

fn boxed(e: opencv::Error) -> BackendError {
    Box::new(e)
}

impl capture::Frame for Mat {
    fn describe(&self) -> Result<FrameInfo, Error> {
        let wrap = |e| Error::FrameRead {
            source: Some(boxed(e)),
        };
        let bytes = self.total() * self.elem_size().map_err(wrap)?;
        Ok(FrameInfo {
            pixel_type: opencv::core::type_to_string(self.typ()).map_err(wrap)?,
            rows: self.rows().max(0) as u32,
            cols: self.cols().max(0) as u32,
            bytes: bytes as u64,
        })
    }
}

pub struct Source {
    capture: VideoCapture,
}

impl Source {
    pub fn open(target: &Target) -> Result<Self, Error> {
        let wrap = |e| Error::SourceOpen {
            target: target.redacted(),
            source: Some(boxed(e)),
        };
        let capture = match target {
            Target::File(path) => {
                info!("opening from video file {}", path.display());
                VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)
            }
            Target::Rtsp(url) => {
                info!("opening stream {}", target.redacted());
                VideoCapture::from_file(url.as_str(), videoio::CAP_ANY)
            }
        }
        .map_err(wrap)?;
        if !capture.is_opened().map_err(wrap)? {
            return Err(Error::SourceOpen {
                target: target.redacted(),
                source: None,
            });
        }
        Ok(Source { capture })
    }
}

impl capture::FrameSource for Source {
    type Frame = Mat;

    fn read(&mut self, frame: &mut Mat) -> Result<(), Error> {
        let ok = self.capture.read(frame).map_err(|e| Error::FrameRead {
            source: Some(boxed(e)),
        })?;
        if !ok || frame.empty() {
            return Err(Error::FrameRead { source: None });
        }
        Ok(())
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            debug!("releasing video capture failed: {}", e);
        }
    }
}

/// Settings for the encoded output file.
#[derive(Clone, Debug)]
pub struct WriterOpts {
    pub dir: PathBuf,
    pub naming: Naming,
    pub idc: u32,
    pub fourcc: [u8; 4],
    pub fps: f64,
}

/// Opens a [`Writer`] once the frame size is known.
pub struct WriterOpener {
    opts: WriterOpts,
    target: Target,
}

impl WriterOpener {
    pub fn new(opts: WriterOpts, target: Target) -> Self {
        WriterOpener { opts, target }
    }
}

impl capture::SinkOpener<Mat> for WriterOpener {
    type Sink = Writer;

    fn open(&mut self, dims: Dimensions) -> Result<Writer, Error> {
        let path = recording::prepare(&self.opts.dir, self.opts.naming, self.opts.idc)?;
        let wrap = |e| Error::SinkCreate {
            path: path.clone(),
            source: Some(boxed(e)),
        };
        let [a, b, c, d] = self.opts.fourcc.map(char::from);
        let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(wrap)?;
        let size = Size::new(dims.width as i32, dims.height as i32);
        let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, self.opts.fps, size, true)
            .map_err(wrap)?;
        if !writer.is_opened().map_err(wrap)? {
            return Err(Error::SinkCreate { path, source: None });
        }
        info!("recording to {}", path.display());
        let info = RecordingInfo::new(
            self.opts.idc,
            &self.target,
            dims,
            self.opts.fps,
            &String::from_utf8_lossy(&self.opts.fourcc),
        );
        Ok(Writer { writer, path, info })
    }
}

pub struct Writer {
    writer: VideoWriter,
    path: PathBuf,
    info: RecordingInfo,
}

impl capture::FrameSink<Mat> for Writer {
    fn write(&mut self, frame: &Mat) -> Result<(), Error> {
        self.writer.write(frame).map_err(|e| Error::FrameWrite {
            source: Some(boxed(e)),
        })?;
        self.info.frames += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<(), Error> {
        self.writer
            .release()
            .map_err(|e| Error::SinkClose { source: boxed(e) })?;
        self.info.finished = Some(chrono::Local::now());
        if let Err(e) = self.info.write(&self.path) {
            error!(
                "unable to write {}: {}",
                recording::sidecar_path(&self.path).display(),
                e
            );
        }
        info!("wrote {} frames to {}", self.info.frames, self.path.display());
        Ok(())
    }
}

/// A named highgui window.
pub struct Window {
    name: String,
}

impl Window {
    pub fn open(name: String) -> Result<Self, Error> {
        highgui::named_window(&name, highgui::WINDOW_AUTOSIZE).map_err(|e| Error::Display {
            source: boxed(e),
        })?;
        Ok(Window { name })
    }
}

impl Surface<Mat> for Window {
    fn present(&mut self, frame: &Mat) -> Result<Option<i32>, Error> {
        let wrap = |e| Error::Display { source: boxed(e) };
        highgui::imshow(&self.name, frame).map_err(wrap)?;
        let key = highgui::wait_key(1).map_err(wrap)?;
        Ok((key >= 0).then_some(key & 0xff))
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_window(&self.name) {
            debug!("destroying window failed: {}", e);
        }
    }
}

/// Grayscale conversion followed by a box blur.
pub struct GrayBlur {
    kernel: i32,
    gray: Mat,
    blurred: Mat,
}

impl GrayBlur {
    pub fn new(kernel: u32) -> Self {
        GrayBlur {
            kernel: kernel.max(1) as i32,
            gray: Mat::default(),
            blurred: Mat::default(),
        }
    }
}

impl FrameFilter<Mat> for GrayBlur {
    fn apply<'a>(&'a mut self, frame: &'a Mat) -> Result<&'a Mat, Error> {
        let wrap = |e| Error::Display { source: boxed(e) };
        imgproc::cvt_color_def(frame, &mut self.gray, imgproc::COLOR_BGR2GRAY).map_err(wrap)?;
        imgproc::blur(
            &self.gray,
            &mut self.blurred,
            Size::new(self.kernel, self.kernel),
            Point::new(-1, -1),
            BORDER_DEFAULT,
        )
        .map_err(wrap)?;
        Ok(&self.blurred)
    }
}

/// Either filter, chosen at runtime.
pub enum Filter {
    None(capture::Passthrough),
    GrayBlur(GrayBlur),
}

impl FrameFilter<Mat> for Filter {
    fn apply<'a>(&'a mut self, frame: &'a Mat) -> Result<&'a Mat, Error> {
        match self {
            Filter::None(p) => p.apply(frame),
            Filter::GrayBlur(f) => f.apply(frame),
        }
    }
}

/// Either surface, chosen at runtime.
pub enum Display {
    Headless(capture::Headless),
    Window(Window),
}

impl Surface<Mat> for Display {
    fn present(&mut self, frame: &Mat) -> Result<Option<i32>, Error> {
        match self {
            Display::Headless(h) => h.present(frame),
            Display::Window(w) => w.present(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn describes_mat() {
        let mat = Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(0.)).unwrap();
        let info = mat.describe().unwrap();
        assert_eq!(
            info,
            FrameInfo {
                pixel_type: "CV_8UC3".to_owned(),
                rows: 480,
                cols: 640,
                bytes: 640 * 480 * 3,
            }
        );
        assert_eq!(
            info.dimensions(),
            Dimensions {
                width: 640,
                height: 480
            }
        );
    }

    #[test]
    fn gray_blur_is_single_channel_same_size() {
        let mat = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(90.)).unwrap();
        let mut f = GrayBlur::new(25);
        let out = f.apply(&mat).unwrap();
        assert_eq!(out.channels(), 1);
        assert_eq!((out.rows(), out.cols()), (48, 64));
        assert_eq!(mat.channels(), 3);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Target::File(tmp.path().join("absent.mkv"));
        assert!(matches!(
            Source::open(&target),
            Err(Error::SourceOpen { .. })
        ));
    }
}
