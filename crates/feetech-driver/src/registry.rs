//! 设备注册表
//!
//! 构造时确定的舵机 ID 列表与各自的寄存器映射，之后不可变。

use crate::error::ConfigError;
use feetech_protocol::{ActuatorId, RegisterLayout, is_valid_id};
use std::collections::HashMap;

/// 舵机注册表
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    ids: Vec<ActuatorId>,
    layouts: Vec<RegisterLayout>,
    index: HashMap<ActuatorId, usize>,
    uniform: bool,
}

impl DeviceRegistry {
    /// 创建注册表
    ///
    /// `layouts` 长度须与 `ids` 相同；只给一个映射时由所有舵机共享。
    pub fn new(ids: Vec<ActuatorId>, layouts: Vec<RegisterLayout>) -> Result<Self, ConfigError> {
        if ids.is_empty() {
            return Err(ConfigError::Empty);
        }

        let layouts = if layouts.len() == 1 {
            vec![layouts[0]; ids.len()]
        } else if layouts.len() == ids.len() {
            layouts
        } else {
            return Err(ConfigError::Mismatch {
                ids: ids.len(),
                layouts: layouts.len(),
            });
        };

        let mut index = HashMap::with_capacity(ids.len());
        for (i, &id) in ids.iter().enumerate() {
            if !is_valid_id(id) {
                return Err(ConfigError::InvalidId(id));
            }
            if index.insert(id, i).is_some() {
                return Err(ConfigError::DuplicateId(id));
            }
        }

        let uniform = layouts.windows(2).all(|w| w[0] == w[1]);

        Ok(Self {
            ids,
            layouts,
            index,
            uniform,
        })
    }

    /// 所有舵机共享同一寄存器映射
    pub fn shared(ids: Vec<ActuatorId>, layout: RegisterLayout) -> Result<Self, ConfigError> {
        Self::new(ids, vec![layout])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 配置顺序的舵机 ID
    pub fn ids(&self) -> &[ActuatorId] {
        &self.ids
    }

    pub fn layouts(&self) -> &[RegisterLayout] {
        &self.layouts
    }

    pub fn layout(&self, index: usize) -> Option<&RegisterLayout> {
        self.layouts.get(index)
    }

    pub fn index_of(&self, id: ActuatorId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn layout_for(&self, id: ActuatorId) -> Option<&RegisterLayout> {
        self.index_of(id).and_then(|i| self.layouts.get(i))
    }

    /// 所有舵机的寄存器映射是否相同（可以使用同步读写）
    pub fn is_uniform(&self) -> bool {
        self.uniform
    }

    /// 统一映射时返回该映射
    pub fn shared_layout(&self) -> Option<&RegisterLayout> {
        if self.uniform { self.layouts.first() } else { None }
    }

    /// 按配置顺序遍历 `(index, id, layout)`
    pub fn iter(&self) -> impl Iterator<Item = (usize, ActuatorId, &RegisterLayout)> {
        self.ids
            .iter()
            .zip(self.layouts.iter())
            .enumerate()
            .map(|(i, (&id, layout))| (i, id, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feetech_protocol::sts3215;

    fn custom_layout() -> RegisterLayout {
        RegisterLayout {
            present_speed: sts3215::PRESENT_LOAD,
            ..RegisterLayout::sts3215()
        }
    }

    #[test]
    fn test_shared_layout_expands() {
        let registry = DeviceRegistry::shared(vec![1, 2, 3], RegisterLayout::sts3215()).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.layouts().len(), 3);
        assert!(registry.is_uniform());
        assert_eq!(registry.shared_layout(), Some(&RegisterLayout::sts3215()));
    }

    #[test]
    fn test_lookup_by_id() {
        let registry =
            DeviceRegistry::new(vec![7, 3], vec![RegisterLayout::sts3215(), custom_layout()])
                .unwrap();
        assert_eq!(registry.index_of(3), Some(1));
        assert_eq!(registry.index_of(9), None);
        assert_eq!(registry.layout_for(3), Some(&custom_layout()));
        assert!(!registry.is_uniform());
        assert_eq!(registry.shared_layout(), None);
    }

    #[test]
    fn test_cardinality_mismatch() {
        let err = DeviceRegistry::new(
            vec![1, 2, 3],
            vec![RegisterLayout::sts3215(), RegisterLayout::sts3215()],
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::Mismatch { ids: 3, layouts: 2 });
    }

    #[test]
    fn test_empty() {
        assert_eq!(
            DeviceRegistry::new(vec![], vec![RegisterLayout::sts3215()]).unwrap_err(),
            ConfigError::Empty
        );
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let layout = RegisterLayout::sts3215();
        assert_eq!(
            DeviceRegistry::shared(vec![1, 2, 1], layout).unwrap_err(),
            ConfigError::DuplicateId(1)
        );
        assert_eq!(
            DeviceRegistry::shared(vec![1, 0xFE], layout).unwrap_err(),
            ConfigError::InvalidId(0xFE)
        );
        assert_eq!(
            DeviceRegistry::shared(vec![0], layout).unwrap_err(),
            ConfigError::InvalidId(0)
        );
    }

    #[test]
    fn test_iter_in_configuration_order() {
        let registry = DeviceRegistry::shared(vec![5, 1, 9], RegisterLayout::sts3215()).unwrap();
        let ids: Vec<_> = registry.iter().map(|(i, id, _)| (i, id)).collect();
        assert_eq!(ids, vec![(0, 5), (1, 1), (2, 9)]);
    }
}
