//! Reading and writing tree files.
//!
//! Paths ending in `.gz` are transparently (de)compressed; the path `-`
//! stands for stdin or stdout. NEXUS files are recognised by their `#NEXUS`
//! header and read from their `TREE name = ...;` lines, with tip labels
//! translated through the `TRANSLATE` block when there is one.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::debug;

use crate::error::{Result, TreeError};
use crate::stream::{TreeStream, stream_newick, stream_results};
use crate::tree::{Tree, parse_newick};

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Reads a whole file as text.
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let p = path.as_ref();
    let mut text = String::new();
    if is_stdio(p) {
        io::stdin().read_to_string(&mut text)?;
    } else if is_gz(p) {
        GzDecoder::new(File::open(p)?).read_to_string(&mut text)?;
    } else {
        File::open(p)?.read_to_string(&mut text)?;
    }
    debug!("read {} bytes from {}", text.len(), p.display());
    Ok(text)
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    let out: Box<dyn Write> = if is_stdio(path) {
        Box::new(BufWriter::new(io::stdout()))
    } else if is_gz(path) {
        let f = File::create(path)?;
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(File::create(path)?))
    };
    Ok(out)
}

/// Streams the trees of a Newick or NEXUS file.
pub fn stream_file<P: AsRef<Path>>(path: P, capacity: usize) -> Result<TreeStream> {
    let text = read_text(path)?;
    if text.trim_start().to_ascii_uppercase().starts_with("#NEXUS") {
        Ok(stream_nexus(text, capacity))
    } else {
        Ok(stream_newick(text, capacity))
    }
}

/// Reads the first tree of a Newick or NEXUS file.
pub fn read_tree<P: AsRef<Path>>(path: P) -> Result<Tree> {
    let stream = stream_file(path, 1)?;
    let first = stream.recv().map_err(|_| TreeError::EmptyStream)?;
    // the producer stops once the receiver is gone
    drop(stream);
    first.tree
}

/// Streams the trees of NEXUS text, renaming tips through its `TRANSLATE`
/// block.
pub fn stream_nexus(text: String, capacity: usize) -> TreeStream {
    let translate = parse_translate(&text);
    let bodies: Vec<String> = tree_lines(&text).map(str::to_string).collect();
    debug!("nexus: {} trees, {} translated taxa", bodies.len(), translate.len());
    stream_results(
        bodies.into_iter().map(move |body| -> Result<Tree> {
            let mut tree = parse_newick(&body)?;
            if !translate.is_empty() {
                tree.rename_tips(&translate);
            }
            Ok(tree)
        }),
        capacity,
    )
}

/// Newick part of every `TREE name = ...;` line.
fn tree_lines(content: &str) -> impl Iterator<Item = &str> {
    content.lines().filter_map(|line| {
        let line = line.trim();
        if !line.to_ascii_uppercase().starts_with("TREE ") {
            return None;
        }
        let (_, body) = line.split_once('=')?;
        Some(body.trim())
    })
}

/// `TRANSLATE` entries, `id label` pairs separated by commas and closed by `;`:
///
/// ```text
/// Translate
///     1 '1959.M.CD.59.ZR59',
///     2 '1960.DRC60A'
/// ;
/// ```
fn parse_translate(content: &str) -> HashMap<String, String> {
    let upper = content.to_ascii_uppercase();
    let Some(start) = upper.find("TRANSLATE") else {
        return HashMap::new();
    };
    let body = &content[start + "TRANSLATE".len()..];
    let end = body.find(';').unwrap_or(body.len());
    body[..end]
        .split(',')
        .filter_map(|pair| {
            let (id, label) = pair.trim().split_once(char::is_whitespace)?;
            Some((id.to_string(), translate_label(label.trim())?))
        })
        .collect()
}

/// A `TRANSLATE` label: single-quoted (spaces kept, `''` for a quote) or
/// one bare word.
fn translate_label(label: &str) -> Option<String> {
    match label.strip_prefix('\'') {
        Some(rest) => Some(rest.strip_suffix('\'').unwrap_or(rest).replace("''", "'")),
        None => label.split_whitespace().next().map(str::to_string),
    }
}

/// Reads a two-column `tip<TAB>state` table (commas also separate columns).
pub fn read_tip_states<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let text = read_text(path)?;
    let mut states = HashMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, state) = line
            .split_once(['\t', ','])
            .ok_or_else(|| TreeError::Parse(format!("line {}: expected two columns", i + 1)))?;
        states.insert(name.trim().to_string(), state.trim().to_string());
    }
    Ok(states)
}

/// Writes text to a file or stdout.
pub fn write_text<P: AsRef<Path>>(path: P, text: &str) -> Result<()> {
    let mut out = open_output(path.as_ref())?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Writes one Newick tree per line.
pub fn write_trees<P: AsRef<Path>>(path: P, trees: &[Tree]) -> Result<()> {
    let mut out = open_output(path.as_ref())?;
    for tree in trees {
        writeln!(out, "{}", tree.to_newick()?)?;
    }
    out.flush()?;
    Ok(())
}

/// Write a labeled square matrix as TSV to a file or stdout.
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_matrix_tsv<P: AsRef<Path>, T: std::fmt::Display>(path: P, names: &[String], mat: &[Vec<T>]) -> Result<()> {
    if names.len() != mat.len() {
        return Err(TreeError::InvalidArgument(format!("{} names for {} rows", names.len(), mat.len())));
    }
    let mut out = open_output(path.as_ref())?;

    // Header row
    write!(out, "\t")?;
    write!(out, "{}", names.join("\t"))?;
    writeln!(out)?;

    // Rows
    for (name, row) in names.iter().zip(mat) {
        write!(out, "{name}")?;
        for val in row {
            write!(out, "\t{val}")?;
        }
        writeln!(out)?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_all;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tree-toolkit-{}-{name}", std::process::id()))
    }

    const NEXUS: &str = "#NEXUS\nBegin trees;\n\tTranslate\n\t\t1 'Homo',\n\t\t2 Pan,\n\t\t3 Gorilla,\n\t\t4 Pongo\n\t\t;\n\
tree STATE_0 = [&R] ((1:1,2:1):0.5,(3:1,4:1):0.5);\n\
tree STATE_1000 = [&R] ((1:1,3:1):0.5,(2:1,4:1):0.5);\nEnd;\n";

    #[test]
    fn test_nexus_translate() {
        let trees = read_all(stream_nexus(NEXUS.to_string(), 1)).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].to_newick().unwrap(), "((Homo:1,Pan:1):0.5,(Gorilla:1,Pongo:1):0.5);");
        let mut names = trees[1].tip_names();
        names.sort();
        assert_eq!(names, vec!["Gorilla", "Homo", "Pan", "Pongo"]);
    }

    #[test]
    fn test_translate_quoted_labels() {
        let text = "#NEXUS\nBegin trees;\nTranslate\n  1 'Homo sapiens',\n  2 'O''Brien',\n  3 Pan\n;\n\
tree one = (1,2,3);\nEnd;\n";
        let translate = parse_translate(text);
        assert_eq!(translate["1"], "Homo sapiens");
        assert_eq!(translate["2"], "O'Brien");
        assert_eq!(translate["3"], "Pan");
        let trees = read_all(stream_nexus(text.to_string(), 1)).unwrap();
        assert_eq!(trees[0].to_newick().unwrap(), "('Homo sapiens','O''Brien',Pan);");
    }

    #[test]
    fn test_gz_round_trip() {
        let path = temp_path("trees.nwk.gz");
        let trees = vec![
            parse_newick("((A:1,B:2):1,C:1,D:1);").unwrap(),
            parse_newick("((A,C),B,D);").unwrap(),
        ];
        write_trees(&path, &trees).unwrap();
        let back = read_all(stream_file(&path, 2).unwrap()).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].to_newick().unwrap(), "((A:1,B:2):1,C:1,D:1);");
        assert_eq!(read_tree(&path).unwrap().to_newick().unwrap(), "((A:1,B:2):1,C:1,D:1);");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_nexus_file_detected() {
        let path = temp_path("trees.nex");
        std::fs::write(&path, NEXUS).unwrap();
        assert_eq!(read_all(stream_file(&path, 1).unwrap()).unwrap().len(), 2);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_matrix_tsv() {
        let path = temp_path("matrix.tsv");
        let names = vec!["t0".to_string(), "t1".to_string()];
        write_matrix_tsv(&path, &names, &[vec![0, 2], vec![2, 0]]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "\tt0\tt1\nt0\t0\t2\nt1\t2\t0\n");
        assert!(write_matrix_tsv(&path, &names, &[vec![0]]).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_tip_states() {
        let path = temp_path("states.tsv");
        std::fs::write(&path, "# tip\tstate\nA\tx\nB,y\n\n").unwrap();
        let states = read_tip_states(&path).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states["B"], "y");
        std::fs::write(&path, "A x\n").unwrap();
        assert!(matches!(read_tip_states(&path), Err(TreeError::Parse(_))));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(read_text(temp_path("missing")), Err(TreeError::Io(_))));
    }
}
