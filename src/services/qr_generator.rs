use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use qrcode::{types::Color, EcLevel, QrCode};
use url::Url;

use crate::services::asset_store::{AssetRef, AssetStore, AssetUploadError};

/// Upper bound on the rendered image's side, in pixels.
pub const QR_TARGET_WIDTH: u32 = 300;

/// Quiet zone around the code, in modules.
pub const QR_MARGIN_MODULES: u32 = 4;

pub const QR_CONTENT_TYPE: &str = "image/png";

#[derive(thiserror::Error, Debug)]
pub enum QrRenderError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    EncodeError(#[from] image::ImageError),
}

#[derive(thiserror::Error, Debug)]
pub enum CredentialAssetError {
    #[error("Rendering failed: {0}")]
    Render(#[from] QrRenderError),

    #[error("Upload failed: {0}")]
    AssetUploadFailed(#[from] AssetUploadError),
}

/// A rendered, uploaded credential image
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialAsset {
    pub asset: AssetRef,
    /// URL the code resolves to when scanned
    pub verification_url: Url,
}

/// Builds the public verification URL for a card: `<base>?id=<cardId>`.
pub fn verification_url(base: &Url, card_id: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("id", card_id);
    url
}

pub fn asset_filename(card_id: &str) -> String {
    format!("qr-code-{}.png", card_id)
}

/// Renders `data` as a greyscale PNG QR code with high error correction.
///
/// Modules are scaled by the largest integer factor that keeps the image
/// within [`QR_TARGET_WIDTH`], never below one pixel per module.
pub fn render_qr_png(data: &str) -> Result<Vec<u8>, QrRenderError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::H)?;

    let modules = code.width() as u32;
    let total_modules = modules + 2 * QR_MARGIN_MODULES;
    let module_size = (QR_TARGET_WIDTH / total_modules).max(1);
    let img_size = total_modules * module_size;

    let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(img_size, img_size, |x, y| {
        let module_x = x / module_size;
        let module_y = y / module_size;

        let in_code = (QR_MARGIN_MODULES..QR_MARGIN_MODULES + modules).contains(&module_x)
            && (QR_MARGIN_MODULES..QR_MARGIN_MODULES + modules).contains(&module_y);
        if !in_code {
            return Luma([255u8]);
        }

        let module = code[(
            (module_x - QR_MARGIN_MODULES) as usize,
            (module_y - QR_MARGIN_MODULES) as usize,
        )];
        match module {
            Color::Dark => Luma([0u8]),
            Color::Light => Luma([255u8]),
        }
    });

    let mut png_data = Vec::new();
    DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        ImageFormat::Png,
    )?;

    Ok(png_data)
}

/// Renders the verification code for `card_id` and stores it.
///
/// Nothing references the uploaded asset until the caller persists a card,
/// so a failure here leaves no partial card behind.
#[tracing::instrument(skip(assets, verification_base))]
pub async fn generate_credential_asset<A: AssetStore>(
    assets: &A,
    verification_base: &Url,
    card_id: &str,
) -> Result<CredentialAsset, CredentialAssetError> {
    let verification_url = verification_url(verification_base, card_id);
    let png = render_qr_png(verification_url.as_str())?;

    tracing::debug!(
        url = %verification_url,
        png_bytes = png.len(),
        "Rendered credential QR code"
    );

    let asset = assets
        .upload(png, &asset_filename(card_id), QR_CONTENT_TYPE)
        .await?;

    Ok(CredentialAsset {
        asset,
        verification_url,
    })
}
