use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use vigil_core::FEATURE_COUNT;

/// KDD 风格数据集中的一行：41 个特征加标签
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    pub features: Vec<f32>,
    pub label: String,
}

impl LabeledRecord {
    pub fn is_normal(&self) -> bool {
        self.label == "normal"
    }
}

/// 分类列（协议、服务、标志）到数值的映射
///
/// 编号按首次出现的顺序分配，需要和训练模型时使用的文件一致。
#[derive(Debug, Clone, Default)]
pub struct CategoricalMaps {
    protocol: HashMap<String, f32>,
    service: HashMap<String, f32>,
    flag: HashMap<String, f32>,
}

impl CategoricalMaps {
    pub fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut maps = Self::default();
        for line in lines {
            let Some(fields) = split_record(line) else {
                continue;
            };
            if fields.len() < 4 {
                continue;
            }
            maps.observe(&fields);
        }
        maps
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dataset '{}'", path.display()))?;
        Ok(Self::from_lines(content.lines()))
    }

    fn observe(&mut self, fields: &[&str]) {
        for (map, value) in [
            (&mut self.protocol, fields[1]),
            (&mut self.service, fields[2]),
            (&mut self.flag, fields[3]),
        ] {
            let next = map.len() as f32;
            map.entry(value.to_string()).or_insert(next);
        }
    }

    /// 把一行记录转成特征向量
    ///
    /// 未知的分类值和无法解析的数值都记为 0。
    pub fn record_to_features(&self, fields: &[&str]) -> Result<Vec<f32>> {
        if fields.len() < FEATURE_COUNT {
            anyhow::bail!(
                "record has {} fields, expected at least {}",
                fields.len(),
                FEATURE_COUNT
            );
        }

        let features = fields[..FEATURE_COUNT]
            .iter()
            .enumerate()
            .map(|(i, raw)| match i {
                1 => self.protocol.get(*raw).copied().unwrap_or(0.0),
                2 => self.service.get(*raw).copied().unwrap_or(0.0),
                3 => self.flag.get(*raw).copied().unwrap_or(0.0),
                _ => raw.trim().parse::<f32>().unwrap_or(0.0),
            })
            .collect();
        Ok(features)
    }
}

/// 已加载的数据集
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<LabeledRecord>,
}

impl Dataset {
    pub fn parse(content: &str, maps: &CategoricalMaps) -> Self {
        let records = content
            .lines()
            .filter_map(split_record)
            .filter_map(|fields| {
                let features = maps.record_to_features(&fields).ok()?;
                let label = fields
                    .get(FEATURE_COUNT)
                    .map(|l| l.trim().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Some(LabeledRecord { features, label })
            })
            .collect();
        Self { records }
    }

    /// 读取数据集；`categories` 为空时用数据集本身构建分类映射
    pub fn load(path: &Path, categories: Option<&Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dataset '{}'", path.display()))?;
        let maps = match categories {
            Some(source) => CategoricalMaps::from_file(source)?,
            None => CategoricalMaps::from_lines(content.lines()),
        };
        let dataset = Self::parse(&content, &maps);
        if dataset.is_empty() {
            anyhow::bail!("dataset '{}' has no usable records", path.display());
        }
        tracing::info!(
            "Loaded {} records from {} ({} normal)",
            dataset.len(),
            path.display(),
            dataset.records.iter().filter(|r| r.is_normal()).count()
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按标签筛选：normal 或非 normal
    pub fn filtered(&self, normal: bool) -> Vec<LabeledRecord> {
        self.records
            .iter()
            .filter(|r| r.is_normal() == normal)
            .cloned()
            .collect()
    }
}

// '@' 开头的是 ARFF 头部，跳过
fn split_record(line: &str) -> Option<Vec<&str>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('@') {
        return None;
    }
    Some(line.split(',').collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NORMAL: &str = "0,tcp,http,SF,491,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,2,2,0.00,0.00,0.00,0.00,1.00,0.00,0.00,150,25,0.17,0.03,0.17,0.00,0.00,0.00,0.05,0.00,normal";
    const ATTACK: &str = "0,udp,ftp,REJ,10,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,2,2,0.00,0.00,0.00,0.00,1.00,0.00,0.00,150,25,0.17,0.03,0.17,0.00,0.00,0.00,0.05,0.00,neptune";

    fn fields(line: &str) -> Vec<&str> {
        line.split(',').collect()
    }

    #[test]
    fn test_categorical_maps_follow_first_appearance() {
        let maps = CategoricalMaps::from_lines([NORMAL, ATTACK].into_iter());
        let features = maps.record_to_features(&fields(ATTACK)).unwrap();

        assert_eq!(features.len(), FEATURE_COUNT);
        assert_eq!(features[1], 1.0);
        assert_eq!(features[2], 1.0);
        assert_eq!(features[3], 1.0);
        assert_eq!(features[4], 10.0);
    }

    #[test]
    fn test_record_to_features() {
        let maps = CategoricalMaps::from_lines([NORMAL].into_iter());
        let features = maps.record_to_features(&fields(NORMAL)).unwrap();

        assert_eq!(&features[..5], &[0.0, 0.0, 0.0, 0.0, 491.0]);
        assert_eq!(features[31], 150.0);
        assert_eq!(features[33], 0.17);
        assert_eq!(features[39], 0.05);
    }

    #[test]
    fn test_unknown_categories_map_to_zero() {
        let maps = CategoricalMaps::from_lines([NORMAL].into_iter());
        let features = maps.record_to_features(&fields(ATTACK)).unwrap();
        assert_eq!(&features[1..4], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_short_record_is_rejected() {
        let maps = CategoricalMaps::default();
        assert!(maps.record_to_features(&["1", "2", "3"]).is_err());
    }

    #[test]
    fn test_dataset_parse_and_filter() {
        let content = format!("@relation kdd\n{}\n{}\n\n1,2,3\n{}\n", NORMAL, ATTACK, NORMAL);
        let maps = CategoricalMaps::from_lines(content.lines());
        let dataset = Dataset::parse(&content, &maps);

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.filtered(true).len(), 2);
        let attacks = dataset.filtered(false);
        assert_eq!(attacks.len(), 1);
        assert_eq!(attacks[0].label, "neptune");
    }
}
