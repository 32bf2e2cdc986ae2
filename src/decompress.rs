use std::io::Read;

/// Best-effort decompression of a non-streaming upstream body for capture
/// purposes only. The bytes returned to the client are never routed through
/// this function — they are forwarded untouched.
///
/// An unrecognized `Content-Encoding` yields `None` rather than guessing at
/// a codec; the caller treats that as "skip the capture, log a warning".
pub fn decompress(content_encoding: Option<&str>, body: &[u8]) -> Option<Vec<u8>> {
   match content_encoding {
      None | Some("") | Some("identity") => Some(body.to_vec()),
      Some("gzip") => {
         let mut decoder = flate2::read::GzDecoder::new(body);
         let mut out = Vec::new();
         decoder.read_to_end(&mut out).ok()?;
         Some(out)
      }
      Some("deflate") => {
         let mut decoder = flate2::read::DeflateDecoder::new(body);
         let mut out = Vec::new();
         decoder.read_to_end(&mut out).ok()?;
         Some(out)
      }
      Some("br") => {
         let mut out = Vec::new();
         brotli::BrotliDecompress(&mut std::io::Cursor::new(body), &mut out).ok()?;
         Some(out)
      }
      Some(_) => None,
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::io::Write;

   #[test]
   fn identity_passes_through() {
      let body = b"hello";
      assert_eq!(decompress(None, body), Some(body.to_vec()));
      assert_eq!(decompress(Some("identity"), body), Some(body.to_vec()));
   }

   #[test]
   fn gzip_round_trips() {
      let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
      encoder.write_all(b"{\"ok\":true}").unwrap();
      let compressed = encoder.finish().unwrap();

      let decompressed = decompress(Some("gzip"), &compressed).unwrap();
      assert_eq!(decompressed, b"{\"ok\":true}");
   }

   #[test]
   fn unknown_codec_returns_none() {
      assert_eq!(decompress(Some("zstd"), b"whatever"), None);
   }
}
