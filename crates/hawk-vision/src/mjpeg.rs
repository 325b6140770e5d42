//! Splitting a concatenated MJPEG byte stream into whole JPEG images.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Give up on a partial image past this size and resync on the next SOI.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every image completed by it, oldest first.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // keep a trailing 0xFF, it may be the first half of an SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let cut = self.buf.len() - keep;
                self.buf.drain(..cut);
                break;
            };
            let Some(end) = find(&self.buf, &EOI, start + 2) else {
                self.buf.drain(..start);
                if self.buf.len() > MAX_FRAME_BYTES {
                    // drop the SOI so the next search moves on
                    self.buf.drain(..2);
                }
                break;
            };
            out.push(self.buf[start..end + 2].to_vec());
            self.buf.drain(..end + 2);
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find(hay: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if from >= hay.len() {
        return None;
    }
    hay[from..].windows(2).position(|w| w == needle).map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn splits_back_to_back_images() {
        let mut s = JpegSplitter::new();
        let mut stream = jpeg(&[1, 2, 3]);
        stream.extend(jpeg(&[4, 5]));
        let out = s.push(&stream);
        assert_eq!(out, vec![jpeg(&[1, 2, 3]), jpeg(&[4, 5])]);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn reassembles_across_chunks() {
        let mut s = JpegSplitter::new();
        let img = jpeg(&[9, 9, 9, 9]);
        assert!(s.push(&img[..3]).is_empty());
        assert!(s.push(&img[3..img.len() - 1]).is_empty());
        assert_eq!(s.push(&img[img.len() - 1..]), vec![img]);
    }

    #[test]
    fn skips_garbage_between_images() {
        let mut s = JpegSplitter::new();
        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend(jpeg(&[7]));
        stream.extend([0xAA, 0xBB]);
        let out = s.push(&stream);
        assert_eq!(out, vec![jpeg(&[7])]);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn soi_split_over_chunk_boundary() {
        let mut s = JpegSplitter::new();
        let img = jpeg(&[1]);
        assert!(s.push(&[0x42, 0xFF]).is_empty());
        assert_eq!(s.pending(), 1);
        assert_eq!(s.push(&img[1..]), vec![img]);
    }
}
