// presentation.rs: The seam between the blur pipeline and whatever shows it.
//
// A shell is offered the kernel names once, then receives one `BlurOutcome`
// per selection. `FilePresenter` is the shell shipped here: it writes both
// images as PNG files and logs the timing labels.

use std::path::{Path, PathBuf};

use crate::blur::{BlurDemo, BlurOutcome};
use crate::error::{Error, Result};
use crate::gpu::Backend;

/// Renders blur results and the list of selectable kernels.
pub trait Presenter {
    fn offer_kernels(&mut self, names: &[String]);
    fn present(&mut self, outcome: &BlurOutcome) -> Result<()>;
}

/// Writes `<dir>/<slug>-host.png` and `<dir>/<slug>-device.png`.
#[derive(Debug, Clone)]
pub struct FilePresenter {
    dir: PathBuf,
    offered: Vec<String>,
    written: Vec<PathBuf>,
}

impl FilePresenter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FilePresenter {
            dir: dir.into(),
            offered: Vec::new(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Kernel names received from the last `offer_kernels`.
    pub fn offered(&self) -> &[String] {
        &self.offered
    }

    /// Every file written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

/// `"Blur 7x7"` → `"blur-7x7"`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

impl Presenter for FilePresenter {
    fn offer_kernels(&mut self, names: &[String]) {
        log::info!("kernels: {}", names.join(", "));
        self.offered = names.to_vec();
    }

    fn present(&mut self, outcome: &BlurOutcome) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::Encode {
            path: self.dir.clone(),
            source: ::image::ImageError::IoError(e),
        })?;
        let stem = slug(&outcome.kernel_name);
        for (suffix, image, label) in [
            ("host", &outcome.host_image, &outcome.host_label),
            ("device", &outcome.device_image, &outcome.device_label),
        ] {
            let path = self.dir.join(format!("{stem}-{suffix}.png"));
            image.save(&path)?;
            log::info!("{label} → {}", path.display());
            self.written.push(path);
        }
        Ok(())
    }
}

/// Drive `demo` through `selections`, presenting each outcome. Stops at the
/// first error.
pub fn run_selections<B: Backend, P: Presenter>(
    demo: &mut BlurDemo<'_, B>,
    presenter: &mut P,
    selections: &[usize],
) -> Result<Vec<BlurOutcome>> {
    presenter.offer_kernels(&demo.kernel_names());
    let mut outcomes = Vec::with_capacity(selections.len());
    for &index in selections {
        let outcome = demo.on_kernel_selected(index)?;
        presenter.present(&outcome)?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
