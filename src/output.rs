// output.rs — Where finished frame results go.
//
// `TextSink` writes the plain-text vector file, one file per frame pair:
//
//   Pass 1 of 3
//   Window size 64
//   Rows 7
//   Cols 7
//   image_x,image_y,U,V
//   32.00,32.00,1.250000000000,-0.500000000000
//   …
//   (5 blank lines)
//
// then the next pass. `MemorySink` keeps results in memory.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use log::info;

use crate::error::Result;
use crate::field::FrameResult;

/// Receives the result of each processed frame pair.
pub trait ResultSink {
    fn write_frame(&mut self, frame: usize, result: &FrameResult) -> Result<()>;
}

/// Render one frame's result in the text vector format.
pub fn write_text<W: Write>(out: &mut W, result: &FrameResult) -> Result<()> {
    let n = result.passes.len();
    for pass in &result.passes {
        writeln!(out, "Pass {} of {}", pass.pass + 1, n)?;
        writeln!(out, "Window size {}", pass.window)?;
        writeln!(out, "Rows {}", pass.rows())?;
        writeln!(out, "Cols {}", pass.cols())?;
        writeln!(out, "image_x,image_y,U,V")?;
        for i in 0..pass.field.len() {
            writeln!(
                out,
                "{:.2},{:.2},{:.12},{:.12}",
                pass.x[i], pass.y[i], pass.field.u[i], pass.field.v[i]
            )?;
        }
        for _ in 0..5 {
            writeln!(out)?;
        }
    }
    Ok(())
}

/// One text file per frame, named by an output template.
pub struct TextSink {
    template: String,
}

impl TextSink {
    pub fn new(template: impl Into<String>) -> Self {
        TextSink {
            template: template.into(),
        }
    }

    pub fn path(&self, frame: usize) -> Result<PathBuf> {
        crate::config::format_template(&self.template, frame as i64).map(PathBuf::from)
    }
}

impl ResultSink for TextSink {
    fn write_frame(&mut self, frame: usize, result: &FrameResult) -> Result<()> {
        let path = self.path(frame)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut out = BufWriter::new(File::create(&path)?);
        write_text(&mut out, result)?;
        out.flush()?;
        info!("[ripiv] frame {frame}: wrote {}", path.display());
        Ok(())
    }
}

/// Collects every frame result in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<(usize, FrameResult)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for MemorySink {
    fn write_frame(&mut self, frame: usize, result: &FrameResult) -> Result<()> {
        self.frames.push((frame, result.clone()));
        Ok(())
    }
}
