//! 文件协作方：类型识别与有界预览
//!
//! 预览永不把大文件整体装进提示词：二进制只给占位信息，大文本只取前 N 行；
//! 解码失败的字节一律替换，不抛错。预览结果走容量受限的显式缓存。

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 不复制内容的二进制扩展名
const BINARY_EXTS: &[&str] = &["xlsx", "xls", "xlsb", "xlsm", "parquet", "feather"];

/// 按扩展名识别的文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Data,
    Python,
    Javascript,
    Json,
    Text,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Data => "data",
            FileType::Python => "python",
            FileType::Javascript => "javascript",
            FileType::Json => "json",
            FileType::Text => "text",
            FileType::Unknown => "unknown",
        }
    }
}

/// 检测文件类型
pub fn detect_file_type(path: &Path) -> FileType {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "xlsx" | "xls" => FileType::Data,
        "py" => FileType::Python,
        "js" | "ts" => FileType::Javascript,
        "json" => FileType::Json,
        "txt" | "md" => FileType::Text,
        _ => FileType::Unknown,
    }
}

fn is_binary_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// 文件预览器：有界读取 + 容量受限缓存
///
/// 缓存对编排循环是只读协作方；invalidate/clear 由持有方显式调用。
pub struct FilePreviewer {
    preview_lines: usize,
    max_preview_bytes: u64,
    cache_capacity: usize,
    cache: Mutex<HashMap<PathBuf, String>>,
}

impl FilePreviewer {
    pub fn new(preview_lines: usize, max_preview_mb: u64, cache_capacity: usize) -> Self {
        Self {
            preview_lines,
            max_preview_bytes: max_preview_mb * 1024 * 1024,
            cache_capacity,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 生成文件预览文本；任何失败都降级为描述性文本，不返回 Err
    pub fn preview(&self, path: &Path) -> String {
        if let Some(hit) = self.cache.lock().unwrap().get(path) {
            tracing::debug!("preview cache hit: {}", path.display());
            return hit.clone();
        }

        let text = self.read_preview(path);

        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.cache_capacity {
            // 容量满时腾出一个位置
            if let Some(k) = cache.keys().next().cloned() {
                cache.remove(&k);
            }
        }
        cache.insert(path.to_path_buf(), text.clone());
        text
    }

    /// 清空预览缓存
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn read_preview(&self, path: &Path) -> String {
        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => return format!("读取文件失败: {}", e),
        };

        if is_binary_ext(path) {
            if size > self.max_preview_bytes {
                return format!(
                    "[Excel/二进制文件，大小: {:.1}MB，路径: {}]",
                    size as f64 / (1024.0 * 1024.0),
                    path.display()
                );
            }
            return format!("[二进制文件，长度: {} 字节]", size);
        }

        if size > self.max_preview_bytes {
            return self.read_head_lines(path, size);
        }

        match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("读取文件失败: {}", e),
        }
    }

    /// 大文本文件只取前 preview_lines 行
    fn read_head_lines(&self, path: &Path, size: u64) -> String {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => return format!("读取文件失败: {}", e),
        };
        let mut reader = std::io::BufReader::new(file);
        let mut lines = Vec::with_capacity(self.preview_lines);
        let mut buf = Vec::new();
        for _ in 0..self.preview_lines {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => lines.push(String::from_utf8_lossy(&buf).trim_end().to_string()),
                Err(e) => {
                    lines.push(format!("读取文件失败: {}", e));
                    break;
                }
            }
        }
        format!(
            "[大文件 {:.1}MB，仅预览前 {} 行]\n{}",
            size as f64 / (1024.0 * 1024.0),
            lines.len(),
            lines.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_detect_file_type() {
        assert_eq!(detect_file_type(Path::new("a.csv")), FileType::Data);
        assert_eq!(detect_file_type(Path::new("b.XLSX")), FileType::Data);
        assert_eq!(detect_file_type(Path::new("c.py")), FileType::Python);
        assert_eq!(detect_file_type(Path::new("d.ts")), FileType::Javascript);
        assert_eq!(detect_file_type(Path::new("e.json")), FileType::Json);
        assert_eq!(detect_file_type(Path::new("f.md")), FileType::Text);
        assert_eq!(detect_file_type(Path::new("g.bin")), FileType::Unknown);
        assert_eq!(detect_file_type(Path::new("noext")), FileType::Unknown);
    }

    #[test]
    fn test_preview_small_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        std::fs::write(&path, "hello\nworld\n").unwrap();

        let previewer = FilePreviewer::new(100, 10, 8);
        assert_eq!(previewer.preview(&path), "hello\nworld\n");
    }

    #[test]
    fn test_preview_large_text_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        for i in 0..200 {
            writeln!(f, "row{},value{}", i, i).unwrap();
        }

        // max_preview_mb = 0：任何非空文件都按大文件处理
        let previewer = FilePreviewer::new(5, 0, 8);
        let preview = previewer.preview(&path);
        assert!(preview.contains("仅预览前 5 行"));
        assert!(preview.contains("row0,value0"));
        assert!(preview.contains("row4,value4"));
        assert!(!preview.contains("row5,value5"));
    }

    #[test]
    fn test_preview_binary_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.xlsx");
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let previewer = FilePreviewer::new(100, 10, 8);
        let preview = previewer.preview(&path);
        assert!(preview.contains("128 字节"));
    }

    #[test]
    fn test_preview_cached_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        std::fs::write(&path, "before").unwrap();

        let previewer = FilePreviewer::new(100, 10, 8);
        assert_eq!(previewer.preview(&path), "before");

        // 命中缓存，看不到磁盘上的新内容
        std::fs::write(&path, "after").unwrap();
        assert_eq!(previewer.preview(&path), "before");

        previewer.clear_cache();
        assert_eq!(previewer.preview(&path), "after");
    }

    #[test]
    fn test_preview_missing_file() {
        let previewer = FilePreviewer::new(100, 10, 8);
        let preview = previewer.preview(Path::new("/no/such/file.txt"));
        assert!(preview.contains("读取文件失败"));
    }
}
